//! Crash Sentinel Library
//!
//! An on-device crash-detection safety monitor. It watches the accelerometer
//! stream for violent impacts, gives the user a fixed countdown to cancel a
//! false alarm, and otherwise texts an emergency contact with the best
//! location it can get.
//!
//! # Pipeline
//!
//! - **Signal**: an exponential gravity filter isolates linear acceleration.
//! - **Impact detection**: a strict threshold on the linear magnitude fires
//!   one impact, after which the detector stays suppressed.
//! - **Alert sequence**: a countdown session that can be canceled until its
//!   deadline, then escalates exactly once.
//! - **Escalation**: last-known location, a single fresh fix, or a
//!   location-unavailable note, followed by one send attempt.
//!
//! Host facilities (sensor, location, messaging, permissions, timer, clock)
//! sit behind the traits in [`capabilities`]. The [`controller`] drives them
//! synchronously; [`runtime`] wraps it in a tokio event loop and [`ffi`]
//! exposes it over the C ABI.
//!
//! # Example
//!
//! ```ignore
//! use crash_sentinel::{spawn_monitor, HostCapabilities, SentinelConfig};
//!
//! let config = SentinelConfig::from_toml_str("contact = \"555-0100\"")?;
//! let monitor = spawn_monitor(&config, host);
//! monitor.enable().await?;
//! monitor.push_sample(sample).await?;
//! ```

pub mod alert_sequence;
pub mod capabilities;
pub mod config;
pub mod controller;
pub mod error;
pub mod escalation;
pub mod ffi;
pub mod impact_detection;
pub mod runtime;
pub mod signal;
pub mod types;


// Re-export commonly used types
pub use config::SentinelConfig;
pub use controller::{HostCapabilities, MonitoringController, StatusObserver};
pub use error::{LocationError, Result, SendError, SentinelError};
pub use runtime::{spawn_monitor, MonitorHandle};
pub use types::{
    AlertMessage, AlertSession, Capability, DetectorState, EscalationOutcome, FailureReason,
    GravityEstimate, ImpactEvent, LocationFix, MonitorStatus, Sample, SessionStatus,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
