//! Error types for the crash sentinel.
//!
//! Nothing in here is fatal: every error either leaves the state machine
//! untouched or is absorbed into a terminal session status, after which the
//! controller resumes monitoring.

use crate::types::Capability;

/// Errors surfaced by the sentinel's public operations.
#[derive(Debug, thiserror::Error)]
pub enum SentinelError {
    #[error("emergency contact is empty")]
    InvalidContact,

    #[error("an alert session is already active")]
    AlertAlreadyActive,

    #[error("no alert session is active")]
    NoActiveSession,

    #[error("cancellation rejected: escalation already started")]
    CancellationRejected,

    #[error("no escalation is in progress")]
    NoEscalationInProgress,

    #[error("accelerometer not available")]
    SensorUnavailable,

    #[error("missing {0} permission")]
    PermissionMissing(Capability),

    #[error("message send failed: {0}")]
    SendFailure(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("monitor loop has shut down")]
    MonitorClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for sentinel operations.
pub type Result<T> = std::result::Result<T, SentinelError>;

/// Failure reported by a location provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocationError {
    #[error("location request timed out")]
    Timeout,

    #[error("location services disabled")]
    Disabled,

    #[error("location provider error: {0}")]
    Provider(String),
}

/// Failure reported by a message channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("messaging capability unavailable")]
    Unavailable,

    #[error("{0}")]
    Rejected(String),
}
