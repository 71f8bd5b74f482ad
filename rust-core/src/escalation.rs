//! Escalation: resolve a location and dispatch the emergency text.
//!
//! Location resolution is a three-step ladder:
//! 1. **Fast path**: the provider's cached last-known fix.
//! 2. **Fallback**: one fresh high-accuracy request. No retry loop.
//! 3. **Give up**: send the message with a location-unavailable note.
//!
//! A missing location is a degraded completion, not a failure. Only a missing
//! permission or a send error fails the escalation, and there is exactly one
//! send attempt per escalation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::capabilities::{LocationPriority, LocationProvider, MessageSender, PermissionGate};
use crate::types::{AlertMessage, Capability, EscalationOutcome, FailureReason, LocationFix};

/// Message template and link formatting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// Opening sentence of every alert.
    pub message_prefix: String,
    /// Text placed before the maps link.
    pub location_label: String,
    /// Sentence used when no location could be resolved.
    pub unavailable_note: String,
    /// Maps URL; latitude and longitude are appended as `lat,lon`.
    pub maps_base_url: String,
    /// Decimal places for coordinates. At least 6 (~0.1 m).
    pub coordinate_precision: usize,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            message_prefix: "I may have been in an accident.".to_string(),
            location_label: "My last known location:".to_string(),
            unavailable_note: "Location unavailable.".to_string(),
            maps_base_url: "https://maps.google.com/?q=".to_string(),
            coordinate_precision: 6,
        }
    }
}

/// Resolves a location and sends the alert through the host's channel.
#[derive(Clone)]
pub struct EscalationService {
    config: EscalationConfig,
    location: Arc<dyn LocationProvider>,
    sender: Arc<dyn MessageSender>,
    permissions: Arc<dyn PermissionGate>,
}

impl EscalationService {
    pub fn new(
        config: EscalationConfig,
        location: Arc<dyn LocationProvider>,
        sender: Arc<dyn MessageSender>,
        permissions: Arc<dyn PermissionGate>,
    ) -> Self {
        Self {
            config,
            location,
            sender,
            permissions,
        }
    }

    /// Run one escalation for `contact`.
    ///
    /// A missing permission aborts before anything is sent and asks the host
    /// to prompt again.
    pub fn escalate(&self, contact: &str, deadline_reached_at_ms: u64) -> EscalationOutcome {
        tracing::info!(deadline_reached_at_ms, "Escalating alert");

        if let Some(outcome) = self.require(Capability::Location) {
            return outcome;
        }
        let location = self.resolve_location();
        let message = self.compose_message(contact, location);

        if let Some(outcome) = self.require(Capability::Sms) {
            return outcome;
        }

        match self.sender.send(message.recipient(), message.body()) {
            Ok(()) => {
                tracing::info!(degraded = location.is_none(), "Alert message sent");
                EscalationOutcome::Completed { message, location }
            }
            Err(e) => {
                tracing::error!(error = %e, "Alert message failed");
                EscalationOutcome::Failed(FailureReason::SendFailure(e.to_string()))
            }
        }
    }

    fn require(&self, capability: Capability) -> Option<EscalationOutcome> {
        if self.permissions.has(capability) {
            return None;
        }
        tracing::warn!(%capability, "Escalation aborted: permission missing");
        self.permissions.request(&Capability::ALL);
        Some(EscalationOutcome::Failed(FailureReason::PermissionMissing(
            capability,
        )))
    }

    /// Walk the fast path, then the single fallback request.
    pub fn resolve_location(&self) -> Option<LocationFix> {
        match self.location.last_known() {
            Ok(Some(fix)) => return Some(fix),
            Ok(None) => tracing::debug!("No last-known location, requesting fresh fix"),
            Err(e) => tracing::warn!(error = %e, "Last-known location failed, requesting fresh fix"),
        }

        match self.location.fresh_fix(LocationPriority::HighAccuracy) {
            Ok(Some(fix)) => Some(fix),
            Ok(None) => {
                tracing::warn!("Fresh location request returned nothing");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "Fresh location request failed");
                None
            }
        }
    }

    /// Build the alert text for `contact`.
    pub fn compose_message(&self, contact: &str, location: Option<LocationFix>) -> AlertMessage {
        let body = match location {
            Some(fix) => format!(
                "{} {} {}",
                self.config.message_prefix,
                self.config.location_label,
                self.maps_link(&fix)
            ),
            None => format!("{} {}", self.config.message_prefix, self.config.unavailable_note),
        };
        AlertMessage::new(contact, body)
    }

    /// Maps URL pointing at `fix`.
    pub fn maps_link(&self, fix: &LocationFix) -> String {
        let precision = self.config.coordinate_precision.max(6);
        format!(
            "{}{:.*},{:.*}",
            self.config.maps_base_url, precision, fix.latitude, precision, fix.longitude
        )
    }

    pub fn config(&self) -> &EscalationConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{MockLocation, MockPermissions, MockSender};
    use crate::error::{LocationError, SendError};

    fn service(
        location: &MockLocation,
        sender: &MockSender,
        permissions: &MockPermissions,
    ) -> EscalationService {
        EscalationService::new(
            EscalationConfig::default(),
            Arc::new(location.clone()),
            Arc::new(sender.clone()),
            Arc::new(permissions.clone()),
        )
    }

    #[test]
    fn test_fast_path_location_in_link() {
        let location = MockLocation::fixed(LocationFix::new(48.858370, 2.294481));
        let sender = MockSender::new();
        let svc = service(&location, &sender, &MockPermissions::granted());

        let outcome = svc.escalate("555-0100", 30_000);
        assert!(outcome.is_completed());
        assert!(!outcome.is_degraded());
        assert_eq!(
            sender.sent(),
            vec![(
                "555-0100".to_string(),
                "I may have been in an accident. My last known location: \
                 https://maps.google.com/?q=48.858370,2.294481"
                    .to_string()
            )]
        );
        assert_eq!(location.fresh_calls(), 0);
    }

    #[test]
    fn test_fallback_after_fast_path_error() {
        let location = MockLocation::new(
            Err(LocationError::Timeout),
            Ok(Some(LocationFix::new(1.234567, 2.345678))),
        );
        let sender = MockSender::new();
        let svc = service(&location, &sender, &MockPermissions::granted());

        let outcome = svc.escalate("555", 0);
        match outcome {
            EscalationOutcome::Completed { message, location } => {
                assert_eq!(
                    message.body(),
                    "I may have been in an accident. My last known location: \
                     https://maps.google.com/?q=1.234567,2.345678"
                );
                assert_eq!(location, Some(LocationFix::new(1.234567, 2.345678)));
            }
            other => panic!("expected completion, got {:?}", other),
        }
        assert_eq!(location.fresh_calls(), 1);
    }

    #[test]
    fn test_both_paths_fail_degrades() {
        let location = MockLocation::new(Ok(None), Err(LocationError::Disabled));
        let sender = MockSender::new();
        let svc = service(&location, &sender, &MockPermissions::granted());

        let outcome = svc.escalate("555", 0);
        assert!(outcome.is_degraded());
        assert_eq!(
            sender.sent()[0].1,
            "I may have been in an accident. Location unavailable."
        );
        assert_eq!(location.last_known_calls(), 1);
        assert_eq!(location.fresh_calls(), 1);
    }

    #[test]
    fn test_send_failure_single_attempt() {
        let location = MockLocation::unavailable();
        let sender = MockSender::failing(SendError::Rejected("generic failure".into()));
        let svc = service(&location, &sender, &MockPermissions::granted());

        let outcome = svc.escalate("555", 0);
        assert_eq!(
            outcome,
            EscalationOutcome::Failed(FailureReason::SendFailure("generic failure".into()))
        );
        assert_eq!(sender.attempts(), 1);
    }

    #[test]
    fn test_missing_location_permission_aborts() {
        let location = MockLocation::fixed(LocationFix::new(1.0, 2.0));
        let sender = MockSender::new();
        let permissions = MockPermissions::with_granted(&[Capability::Sms]);
        let svc = service(&location, &sender, &permissions);

        let outcome = svc.escalate("555", 0);
        assert_eq!(
            outcome,
            EscalationOutcome::Failed(FailureReason::PermissionMissing(Capability::Location))
        );
        assert_eq!(sender.attempts(), 0);
        assert_eq!(location.last_known_calls(), 0);
        assert_eq!(permissions.requests().len(), 1);
    }

    #[test]
    fn test_missing_sms_permission_aborts() {
        let location = MockLocation::fixed(LocationFix::new(1.0, 2.0));
        let sender = MockSender::new();
        let permissions = MockPermissions::with_granted(&[Capability::Location]);
        let svc = service(&location, &sender, &permissions);

        let outcome = svc.escalate("555", 0);
        assert_eq!(
            outcome,
            EscalationOutcome::Failed(FailureReason::PermissionMissing(Capability::Sms))
        );
        assert_eq!(sender.attempts(), 0);
        assert_eq!(permissions.requests(), vec![Capability::ALL.to_vec()]);
    }

    #[test]
    fn test_maps_link_precision() {
        let svc = service(
            &MockLocation::unavailable(),
            &MockSender::new(),
            &MockPermissions::granted(),
        );
        assert_eq!(
            svc.maps_link(&LocationFix::new(-33.8688, 151.2093)),
            "https://maps.google.com/?q=-33.868800,151.209300"
        );
    }

    #[test]
    fn test_compose_message_recipient() {
        let svc = service(
            &MockLocation::unavailable(),
            &MockSender::new(),
            &MockPermissions::granted(),
        );
        let message = svc.compose_message("555-0199", None);
        assert_eq!(message.recipient(), "555-0199");
        assert_eq!(message.body(), "I may have been in an accident. Location unavailable.");
    }
}
