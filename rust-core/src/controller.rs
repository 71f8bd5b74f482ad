//! Top-level monitoring coordinator.
//!
//! The controller is the single owner of all mutable state: the detector and
//! its gravity estimate, the alert session, the countdown timer handle and
//! the sensor delivery flag. Every host event enters through one of its
//! `&mut self` methods, so events are serialized by construction; the async
//! runtime only has to make sure one task owns the controller.
//!
//! # Ordering
//!
//! - Sensor delivery is stopped before a session is opened, so no second
//!   impact can be evaluated while one session is unresolved.
//! - Delivery resumes only after the session has been cleared.
//! - At most one countdown timer is outstanding; scheduling a new one first
//!   cancels the old one.

use std::sync::Arc;

use crate::alert_sequence::{AlertSequencer, EscalationRequest, SequencerPhase, TickOutcome};
use crate::capabilities::{
    request_missing, Clock, CountdownTimer, LocationProvider, MessageSender, PermissionGate,
    SensorSource, TimerHandle,
};
use crate::config::SentinelConfig;
use crate::error::{Result, SentinelError};
use crate::escalation::EscalationService;
use crate::impact_detection::ImpactDetector;
use crate::types::{
    AlertSession, Capability, DetectorState, EscalationOutcome, FailureReason, GravityEstimate,
    ImpactEvent, MonitorStatus, Sample,
};

/// Host adapters the controller drives.
pub struct HostCapabilities {
    pub sensor: Box<dyn SensorSource>,
    pub location: Arc<dyn LocationProvider>,
    pub sender: Arc<dyn MessageSender>,
    pub permissions: Arc<dyn PermissionGate>,
}

/// Callback invoked on every status change.
pub type StatusObserver = Box<dyn Fn(&MonitorStatus) + Send>;

/// Glue between the host sensor stream, the impact detector and the alert
/// state machine.
pub struct MonitoringController {
    detector: ImpactDetector,
    sequencer: AlertSequencer,
    escalation: EscalationService,

    sensor: Box<dyn SensorSource>,
    timer: Box<dyn CountdownTimer>,
    clock: Arc<dyn Clock>,
    permissions: Arc<dyn PermissionGate>,

    contact: String,
    tick_interval_ms: u64,

    /// Detection switched on by the user.
    enabled: bool,
    /// Host is in the background; delivery and countdown are paused.
    suspended: bool,
    /// Sensor delivery currently running.
    delivering: bool,
    active_timer: Option<TimerHandle>,

    status: MonitorStatus,
    observer: Option<StatusObserver>,
}

impl MonitoringController {
    /// Build a controller. Missing permissions are requested right away so
    /// the user is prompted before an alert is ever needed.
    pub fn new(
        config: &SentinelConfig,
        host: HostCapabilities,
        timer: Box<dyn CountdownTimer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let escalation = EscalationService::new(
            config.escalation.clone(),
            host.location,
            host.sender,
            Arc::clone(&host.permissions),
        );
        request_missing(host.permissions.as_ref(), &Capability::ALL);

        Self {
            detector: ImpactDetector::new(&config.filter, &config.detector),
            sequencer: AlertSequencer::new(config.countdown.clone()),
            escalation,
            sensor: host.sensor,
            timer,
            clock,
            permissions: host.permissions,
            contact: config.contact.as_deref().unwrap_or_default().trim().to_string(),
            tick_interval_ms: config.countdown.tick_interval_ms,
            enabled: false,
            suspended: false,
            delivering: false,
            active_timer: None,
            status: MonitorStatus::Disabled,
            observer: None,
        }
    }

    /// Register the status observer, replacing any previous one.
    pub fn set_observer(&mut self, observer: StatusObserver) {
        self.observer = Some(observer);
    }

    /// Set the emergency contact. Whitespace is trimmed; an empty contact is
    /// accepted here and rejected when an alert tries to start.
    pub fn set_contact(&mut self, contact: &str) {
        self.contact = contact.trim().to_string();
    }

    pub fn contact(&self) -> &str {
        &self.contact
    }

    // ========================================================================
    // ENABLE / DISABLE
    // ========================================================================

    /// Switch detection on. Fails without side effects other than a status
    /// update when the host has no accelerometer.
    pub fn enable(&mut self) -> Result<()> {
        if !self.sensor.is_available() {
            tracing::warn!("Cannot enable detection: accelerometer not available");
            self.publish(MonitorStatus::SensorUnavailable);
            return Err(SentinelError::SensorUnavailable);
        }
        if self.enabled {
            return Ok(());
        }

        self.enabled = true;
        tracing::info!("Detection enabled");

        if self.sequencer.session().is_none() {
            self.detector.reset_filter();
            self.detector.arm();
            if !self.suspended {
                self.start_delivery();
            }
            self.publish(MonitorStatus::Armed);
        }
        Ok(())
    }

    /// Switch detection off. A running alert is not canceled; it finishes on
    /// its own and monitoring simply does not resume afterwards.
    pub fn disable(&mut self) {
        self.enabled = false;
        self.stop_delivery();
        self.detector.disarm();
        tracing::info!("Detection disabled");
        if !self.sequencer.is_active() {
            self.publish(MonitorStatus::Disabled);
        }
    }

    // ========================================================================
    // HOST LIFECYCLE
    // ========================================================================

    /// The host went to the background: stop delivery and the countdown
    /// timer. The session and its deadline are kept.
    pub fn suspend(&mut self) {
        if self.suspended {
            return;
        }
        self.suspended = true;
        self.stop_delivery();
        self.cancel_timer();
        tracing::debug!("Monitoring suspended");
    }

    /// The host came back: resume delivery if monitoring is idle, or
    /// reschedule the countdown for whatever time is left on a pending
    /// session.
    pub fn resume(&mut self) {
        if !self.suspended {
            return;
        }
        self.suspended = false;
        tracing::debug!("Monitoring resumed");

        match self.sequencer.phase() {
            SequencerPhase::NoSession => {
                if self.enabled {
                    self.detector.arm();
                    self.start_delivery();
                }
            }
            SequencerPhase::Pending => {
                let now = self.clock.now_ms();
                let remaining = self
                    .sequencer
                    .session()
                    .map(|s| s.deadline_ms.saturating_sub(now))
                    .unwrap_or(0);
                self.schedule_timer(remaining);
            }
            _ => {}
        }
    }

    // ========================================================================
    // EVENTS
    // ========================================================================

    /// Feed one accelerometer sample. Samples that arrive while delivery is
    /// off are dropped.
    pub fn on_sample(&mut self, sample: &Sample) -> Option<ImpactEvent> {
        if !self.delivering {
            return None;
        }

        let event = self.detector.on_sample(sample)?;
        // Debounce: stop listening before the session exists.
        self.stop_delivery();
        let _ = self.open_session();
        Some(event)
    }

    /// Start an alert directly, bypassing the detector.
    pub fn simulate(&mut self) -> Result<()> {
        if self.sequencer.session().is_some() {
            return Err(SentinelError::AlertAlreadyActive);
        }
        tracing::info!("Simulated crash requested");
        self.stop_delivery();
        self.open_session()
    }

    /// User cancellation. Only honored while the countdown is pending.
    pub fn cancel(&mut self) -> Result<()> {
        self.sequencer.cancel()?;
        self.cancel_timer();
        self.publish(MonitorStatus::Canceled);
        self.finish_session();
        Ok(())
    }

    /// Countdown tick. Returns the escalation request once, when the
    /// deadline has passed.
    pub fn tick(&mut self) -> Option<EscalationRequest> {
        let now = self.clock.now_ms();
        match self.sequencer.tick(now) {
            TickOutcome::Pending { seconds_remaining } => {
                self.publish(MonitorStatus::Pending { seconds_remaining });
                None
            }
            TickOutcome::DeadlineReached { .. } => {
                self.cancel_timer();
                let request = self.sequencer.begin_escalation().ok()?;
                self.publish(MonitorStatus::Sending);
                Some(request)
            }
            TickOutcome::Inactive => None,
        }
    }

    /// Record the result of an escalation and restore monitoring.
    pub fn complete_escalation(&mut self, outcome: EscalationOutcome) -> Result<()> {
        self.sequencer.resolve(&outcome)?;

        let status = match outcome {
            EscalationOutcome::Completed { .. } => MonitorStatus::Sent,
            EscalationOutcome::Failed(FailureReason::PermissionMissing(cap)) => {
                MonitorStatus::MissingPermission(cap)
            }
            EscalationOutcome::Failed(FailureReason::SendFailure(reason)) => {
                MonitorStatus::Failed { reason }
            }
        };
        self.publish(status);
        self.finish_session();
        Ok(())
    }

    /// Run the escalation inline and complete it.
    pub fn escalate(&mut self, request: &EscalationRequest) -> Result<EscalationOutcome> {
        let outcome = self
            .escalation
            .escalate(&request.contact, request.deadline_reached_at_ms);
        self.complete_escalation(outcome.clone())?;
        Ok(outcome)
    }

    /// Tick, and if the deadline passed, escalate inline.
    pub fn tick_and_escalate(&mut self) -> Result<Option<EscalationOutcome>> {
        match self.tick() {
            Some(request) => self.escalate(&request).map(Some),
            None => Ok(None),
        }
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    fn open_session(&mut self) -> Result<()> {
        let now = self.clock.now_ms();
        match self.sequencer.start(&self.contact, now) {
            Ok(session) => {
                let duration = session.deadline_ms - now;
                self.schedule_timer(duration);
                self.publish(MonitorStatus::Pending {
                    seconds_remaining: duration.div_ceil(1000),
                });
                Ok(())
            }
            Err(SentinelError::InvalidContact) => {
                self.publish(MonitorStatus::InvalidContact);
                self.finish_session();
                Err(SentinelError::InvalidContact)
            }
            Err(e) => Err(e),
        }
    }

    /// Clear a terminal session and resume sampling if detection is on.
    fn finish_session(&mut self) {
        self.sequencer.clear();
        if self.sequencer.session().is_some() {
            return;
        }
        if self.enabled && !self.suspended {
            self.detector.arm();
            self.start_delivery();
        }
    }

    fn schedule_timer(&mut self, duration_ms: u64) {
        self.cancel_timer();
        if self.suspended {
            return;
        }
        self.active_timer = Some(self.timer.schedule(duration_ms, self.tick_interval_ms));
    }

    fn cancel_timer(&mut self) {
        if let Some(handle) = self.active_timer.take() {
            self.timer.cancel(handle);
        }
    }

    fn start_delivery(&mut self) {
        if !self.delivering {
            self.sensor.start();
            self.delivering = true;
        }
    }

    fn stop_delivery(&mut self) {
        if self.delivering {
            self.sensor.stop();
            self.delivering = false;
        }
    }

    fn publish(&mut self, status: MonitorStatus) {
        tracing::info!(%status, "Status");
        if let Some(observer) = &self.observer {
            observer(&status);
        }
        self.status = status;
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn status(&self) -> &MonitorStatus {
        &self.status
    }

    pub fn detector_state(&self) -> DetectorState {
        self.detector.state()
    }

    pub fn gravity(&self) -> GravityEstimate {
        self.detector.gravity()
    }

    pub fn phase(&self) -> SequencerPhase {
        self.sequencer.phase()
    }

    pub fn session(&self) -> Option<&AlertSession> {
        self.sequencer.session()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_delivering(&self) -> bool {
        self.delivering
    }

    /// Whether a permission is currently granted.
    pub fn has_permission(&self, capability: Capability) -> bool {
        self.permissions.has(capability)
    }

    /// Escalation service, for runtimes that run escalation off-loop.
    pub fn escalation_service(&self) -> &EscalationService {
        &self.escalation
    }
}
