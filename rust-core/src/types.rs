//! Core data types for the crash sentinel.
//!
//! This module defines the values that flow between the detection pipeline,
//! the alert state machine and the host adapters. Nothing here is persisted:
//! samples are consumed as they arrive, locations are used once to format a
//! message, and sessions are dropped as soon as monitoring resumes.
//!
//! Design principle: if a concept crosses a module boundary, it gets a type.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single raw accelerometer sample.
///
/// Three-axis reading in m/s² plus the host timestamp. The timestamp is only
/// carried for diagnostics; detection never looks at it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Host timestamp in milliseconds.
    pub timestamp_ms: u64,

    /// Accelerometer reading [x, y, z] in m/s².
    pub accel: [f32; 3],
}

impl Sample {
    /// Creates a new sample.
    pub fn new(timestamp_ms: u64, accel: [f32; 3]) -> Self {
        Self {
            timestamp_ms,
            accel,
        }
    }

    /// Creates a sample from raw axis values with a zero timestamp.
    pub fn from_xyz(x: f32, y: f32, z: f32) -> Self {
        Self::new(0, [x, y, z])
    }

    pub fn x(&self) -> f32 {
        self.accel[0]
    }

    pub fn y(&self) -> f32 {
        self.accel[1]
    }

    pub fn z(&self) -> f32 {
        self.accel[2]
    }
}

/// Smoothed gravity vector in m/s².
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GravityEstimate {
    pub gx: f32,
    pub gy: f32,
    pub gz: f32,
}

impl GravityEstimate {
    /// Returns the estimate as an axis array.
    pub fn as_array(&self) -> [f32; 3] {
        [self.gx, self.gy, self.gz]
    }

    /// Euclidean norm of the estimate.
    pub fn magnitude(&self) -> f32 {
        (self.gx * self.gx + self.gy * self.gy + self.gz * self.gz).sqrt()
    }
}

impl From<[f32; 3]> for GravityEstimate {
    fn from(v: [f32; 3]) -> Self {
        Self {
            gx: v[0],
            gy: v[1],
            gz: v[2],
        }
    }
}

/// Lifecycle of the impact detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectorState {
    /// Not monitoring.
    Idle,
    /// Monitoring and watching for an impact.
    Armed,
    /// An impact fired; the alert sequence owns control until re-armed.
    Suppressed,
}

/// Discrete signal emitted when linear acceleration exceeds the crash threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImpactEvent {
    /// Linear acceleration magnitude that tripped the detector (m/s²).
    pub magnitude: f32,
    /// Timestamp of the triggering sample.
    pub timestamp_ms: u64,
}

/// A resolved position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
}

impl LocationFix {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// A composed emergency text. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMessage {
    recipient: String,
    body: String,
}

impl AlertMessage {
    pub fn new(recipient: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            body: body.into(),
        }
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    pub fn body(&self) -> &str {
        &self.body
    }
}

/// Host capabilities that are gated behind a runtime permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Fine location access.
    Location,
    /// Permission to send text messages.
    Sms,
}

impl Capability {
    /// Every capability the sentinel needs to escalate.
    pub const ALL: [Capability; 2] = [Capability::Location, Capability::Sms];
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Location => write!(f, "location"),
            Capability::Sms => write!(f, "SEND_SMS"),
        }
    }
}

/// Why an escalation did not deliver its message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// A required permission was not granted at escalation time.
    PermissionMissing(Capability),
    /// The message channel reported an error.
    SendFailure(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::PermissionMissing(cap) => write!(f, "missing {} permission", cap),
            FailureReason::SendFailure(reason) => write!(f, "{}", reason),
        }
    }
}

/// Result of one escalation attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum EscalationOutcome {
    /// The message was handed to the channel. `location` is `None` for a
    /// degraded completion.
    Completed {
        message: AlertMessage,
        location: Option<LocationFix>,
    },
    /// Nothing was delivered.
    Failed(FailureReason),
}

impl EscalationOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, EscalationOutcome::Completed { .. })
    }

    /// True when the message went out without a resolved location.
    pub fn is_degraded(&self) -> bool {
        matches!(self, EscalationOutcome::Completed { location: None, .. })
    }
}

/// Status of an alert session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionStatus {
    /// Countdown running; the user may still cancel.
    Pending,
    /// The user canceled before the deadline.
    Canceled,
    /// Deadline reached; escalation has not been handed out yet.
    Expired,
    /// Escalation in flight. Cancellation is no longer possible.
    Resolving,
    /// Message sent, with or without a location.
    Completed { degraded: bool },
    /// Escalation failed.
    Failed(FailureReason),
}

impl SessionStatus {
    /// Terminal statuses wait for `clear()` before monitoring resumes.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Canceled | SessionStatus::Completed { .. } | SessionStatus::Failed(_)
        )
    }
}

/// One countdown/confirmation episode.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertSession {
    /// Recipient of the emergency text.
    pub contact: String,
    /// Monotonic time (ms) at which the alert escalates.
    pub deadline_ms: u64,
    /// Current status.
    pub status: SessionStatus,
}

/// Observer-facing status of the whole monitor.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorStatus {
    /// Detection switched off.
    Disabled,
    /// Watching for impacts.
    Armed,
    /// Countdown running.
    Pending { seconds_remaining: u64 },
    /// The user canceled the alert.
    Canceled,
    /// Escalation in flight.
    Sending,
    /// Alert delivered.
    Sent,
    /// Alert could not be delivered.
    Failed { reason: String },
    /// A permission was missing when it was needed.
    MissingPermission(Capability),
    /// The host has no accelerometer.
    SensorUnavailable,
    /// An alert was requested without a configured contact.
    InvalidContact,
}

impl fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorStatus::Disabled => write!(f, "detection disabled"),
            MonitorStatus::Armed => write!(f, "detection enabled"),
            MonitorStatus::Pending { seconds_remaining } => {
                write!(f, "alert pending ({} s)", seconds_remaining)
            }
            MonitorStatus::Canceled => write!(f, "alert canceled"),
            MonitorStatus::Sending => write!(f, "sending SMS..."),
            MonitorStatus::Sent => write!(f, "SMS sent"),
            MonitorStatus::Failed { reason } => write!(f, "SMS failed: {}", reason),
            MonitorStatus::MissingPermission(cap) => write!(f, "missing {} permission", cap),
            MonitorStatus::SensorUnavailable => write!(f, "accelerometer not available"),
            MonitorStatus::InvalidContact => {
                write!(f, "please enter an emergency contact number first")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_axes() {
        let sample = Sample::from_xyz(1.0, 2.0, 3.0);
        assert_eq!(sample.x(), 1.0);
        assert_eq!(sample.y(), 2.0);
        assert_eq!(sample.z(), 3.0);
        assert_eq!(sample.timestamp_ms, 0);
    }

    #[test]
    fn test_gravity_magnitude() {
        let g = GravityEstimate::from([3.0, 4.0, 0.0]);
        assert_eq!(g.magnitude(), 5.0);
        assert_eq!(g.as_array(), [3.0, 4.0, 0.0]);
    }

    #[test]
    fn test_session_status_terminal() {
        assert!(!SessionStatus::Pending.is_terminal());
        assert!(!SessionStatus::Expired.is_terminal());
        assert!(!SessionStatus::Resolving.is_terminal());
        assert!(SessionStatus::Canceled.is_terminal());
        assert!(SessionStatus::Completed { degraded: true }.is_terminal());
        assert!(SessionStatus::Failed(FailureReason::SendFailure("x".into())).is_terminal());
    }

    #[test]
    fn test_outcome_degraded() {
        let message = AlertMessage::new("555", "body");
        let degraded = EscalationOutcome::Completed {
            message: message.clone(),
            location: None,
        };
        let located = EscalationOutcome::Completed {
            message,
            location: Some(LocationFix::new(1.0, 2.0)),
        };
        assert!(degraded.is_degraded());
        assert!(!located.is_degraded());
        assert!(located.is_completed());
        assert!(!EscalationOutcome::Failed(FailureReason::PermissionMissing(Capability::Sms))
            .is_completed());
    }

    #[test]
    fn test_status_text() {
        assert_eq!(
            MonitorStatus::Pending { seconds_remaining: 30 }.to_string(),
            "alert pending (30 s)"
        );
        assert_eq!(
            MonitorStatus::MissingPermission(Capability::Sms).to_string(),
            "missing SEND_SMS permission"
        );
        assert_eq!(
            MonitorStatus::Failed { reason: "radio off".into() }.to_string(),
            "SMS failed: radio off"
        );
    }
}
