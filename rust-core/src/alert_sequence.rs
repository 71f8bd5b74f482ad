//! Countdown and confirmation state machine.
//!
//! An impact opens a cancellable window. If the user cancels inside the
//! window the session ends quietly; if the deadline passes first the session
//! escalates and cancellation is no longer accepted.
//!
//! ```text
//!  NoSession --start--> Pending --cancel--> Canceled ----clear--> NoSession
//!                          |
//!                          +--tick(now >= deadline)--> Expired
//!                                                        |
//!                                        begin_escalation v
//!                                                    Resolving --resolve--> Completed | Failed --clear--> NoSession
//! ```
//!
//! The sequencer owns at most one session. It never sleeps: time only moves
//! when the caller passes `now` into `start` and `tick`.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SentinelError};
use crate::types::{AlertSession, EscalationOutcome, SessionStatus};

/// Countdown timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CountdownConfig {
    /// Length of the cancellable window (milliseconds).
    pub duration_ms: u64,
    /// Granularity of countdown ticks (milliseconds).
    pub tick_interval_ms: u64,
}

impl Default for CountdownConfig {
    fn default() -> Self {
        Self {
            duration_ms: 30_000,    // 30 seconds
            tick_interval_ms: 1000, // once per second
        }
    }
}

/// Coarse state of the sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequencerPhase {
    NoSession,
    Pending,
    Canceled,
    Expired,
    Resolving,
    Completed,
    Failed,
}

/// What a countdown tick produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Still counting down.
    Pending { seconds_remaining: u64 },
    /// The deadline just passed. Returned exactly once per session.
    DeadlineReached { contact: String, deadline_ms: u64 },
    /// No pending session; the tick is stale.
    Inactive,
}

/// Everything the escalation service needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationRequest {
    pub contact: String,
    pub deadline_reached_at_ms: u64,
}

/// The countdown/confirmation state machine.
#[derive(Debug, Clone)]
pub struct AlertSequencer {
    config: CountdownConfig,
    session: Option<AlertSession>,
    expired_at_ms: Option<u64>,
    sessions_started: u64,
}

impl AlertSequencer {
    pub fn new(config: CountdownConfig) -> Self {
        Self {
            config,
            session: None,
            expired_at_ms: None,
            sessions_started: 0,
        }
    }

    /// Open a new session for `contact` with its deadline `duration_ms` after `now_ms`.
    ///
    /// Rejects an empty contact without creating anything, and refuses to
    /// start while another session (active or awaiting `clear`) exists.
    pub fn start(&mut self, contact: &str, now_ms: u64) -> Result<&AlertSession> {
        if self.session.is_some() {
            tracing::debug!("Alert start ignored: session already active");
            return Err(SentinelError::AlertAlreadyActive);
        }

        let contact = contact.trim();
        if contact.is_empty() {
            tracing::warn!("Alert start rejected: no emergency contact configured");
            return Err(SentinelError::InvalidContact);
        }

        let deadline_ms = now_ms + self.config.duration_ms;
        self.expired_at_ms = None;
        self.sessions_started += 1;
        tracing::info!(deadline_ms, "Alert session pending");

        Ok(&*self.session.insert(AlertSession {
            contact: contact.to_string(),
            deadline_ms,
            status: SessionStatus::Pending,
        }))
    }

    /// Cancel a pending session. Once the deadline has passed the request is
    /// rejected and the session is left alone.
    pub fn cancel(&mut self) -> Result<()> {
        let session = self.session.as_mut().ok_or(SentinelError::NoActiveSession)?;

        match session.status {
            SessionStatus::Pending => {
                session.status = SessionStatus::Canceled;
                tracing::info!("Alert canceled by user");
                Ok(())
            }
            SessionStatus::Expired | SessionStatus::Resolving => {
                tracing::warn!(status = ?session.status, "Cancellation rejected: escalation started");
                Err(SentinelError::CancellationRejected)
            }
            _ => Err(SentinelError::NoActiveSession),
        }
    }

    /// Advance the countdown to `now_ms`.
    pub fn tick(&mut self, now_ms: u64) -> TickOutcome {
        let Some(session) = self.session.as_mut() else {
            return TickOutcome::Inactive;
        };
        if session.status != SessionStatus::Pending {
            return TickOutcome::Inactive;
        }

        if now_ms < session.deadline_ms {
            let remaining_ms = session.deadline_ms - now_ms;
            let seconds_remaining = remaining_ms.div_ceil(1000);
            tracing::debug!(seconds_remaining, "Alert countdown");
            return TickOutcome::Pending { seconds_remaining };
        }

        session.status = SessionStatus::Expired;
        self.expired_at_ms = Some(now_ms);
        tracing::info!(deadline_ms = session.deadline_ms, now_ms, "Alert countdown expired");

        TickOutcome::DeadlineReached {
            contact: session.contact.clone(),
            deadline_ms: session.deadline_ms,
        }
    }

    /// Move an expired session into `Resolving` and hand out the request.
    pub fn begin_escalation(&mut self) -> Result<EscalationRequest> {
        let session = self
            .session
            .as_mut()
            .filter(|s| s.status == SessionStatus::Expired)
            .ok_or(SentinelError::NoEscalationInProgress)?;

        session.status = SessionStatus::Resolving;
        Ok(EscalationRequest {
            contact: session.contact.clone(),
            deadline_reached_at_ms: self.expired_at_ms.unwrap_or(session.deadline_ms),
        })
    }

    /// Record the escalation result on a `Resolving` session.
    pub fn resolve(&mut self, outcome: &EscalationOutcome) -> Result<&SessionStatus> {
        let session = self
            .session
            .as_mut()
            .filter(|s| s.status == SessionStatus::Resolving)
            .ok_or(SentinelError::NoEscalationInProgress)?;

        session.status = match outcome {
            EscalationOutcome::Completed { location, .. } => SessionStatus::Completed {
                degraded: location.is_none(),
            },
            EscalationOutcome::Failed(reason) => SessionStatus::Failed(reason.clone()),
        };
        tracing::info!(status = ?session.status, "Alert session resolved");

        Ok(&session.status)
    }

    /// Drop a terminal session. Active sessions are left untouched and `None`
    /// is returned.
    pub fn clear(&mut self) -> Option<AlertSession> {
        if self.session.as_ref().is_some_and(|s| s.status.is_terminal()) {
            self.expired_at_ms = None;
            self.session.take()
        } else {
            None
        }
    }

    pub fn session(&self) -> Option<&AlertSession> {
        self.session.as_ref()
    }

    pub fn phase(&self) -> SequencerPhase {
        match self.session.as_ref().map(|s| &s.status) {
            None => SequencerPhase::NoSession,
            Some(SessionStatus::Pending) => SequencerPhase::Pending,
            Some(SessionStatus::Canceled) => SequencerPhase::Canceled,
            Some(SessionStatus::Expired) => SequencerPhase::Expired,
            Some(SessionStatus::Resolving) => SequencerPhase::Resolving,
            Some(SessionStatus::Completed { .. }) => SequencerPhase::Completed,
            Some(SessionStatus::Failed(_)) => SequencerPhase::Failed,
        }
    }

    /// True while a session is pending or escalating.
    pub fn is_active(&self) -> bool {
        matches!(
            self.phase(),
            SequencerPhase::Pending | SequencerPhase::Expired | SequencerPhase::Resolving
        )
    }

    pub fn config(&self) -> &CountdownConfig {
        &self.config
    }

    /// Sessions opened since construction.
    pub fn sessions_started(&self) -> u64 {
        self.sessions_started
    }
}

impl Default for AlertSequencer {
    fn default() -> Self {
        Self::new(CountdownConfig::default())
    }
}
