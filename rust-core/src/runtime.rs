//! Async event loop around the monitoring controller.
//!
//! Sensor callbacks, countdown ticks, user actions and escalation results
//! all arrive as [`MonitorCommand`]s on one `mpsc` queue. A single task owns
//! the controller and consumes the queue, so no two events ever mutate state
//! concurrently.
//!
//! - The countdown is a tokio task posting `Tick` once per interval; it is
//!   cancelled by aborting its `JoinHandle`.
//! - Escalation runs on the blocking pool and posts `EscalationFinished`
//!   back onto the queue. Only one escalation can be outstanding because the
//!   controller is `Resolving` until it completes.
//! - Status changes are published on a `watch` channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::capabilities::{Clock, CountdownTimer, TimerHandle};
use crate::config::SentinelConfig;
use crate::controller::{HostCapabilities, MonitoringController};
use crate::error::{Result, SentinelError};
use crate::types::{EscalationOutcome, FailureReason, MonitorStatus, Sample};

/// Queue depth for host events.
const COMMAND_BUFFER: usize = 256;

/// Events accepted by the monitor loop.
#[derive(Debug)]
pub enum MonitorCommand {
    Sample(Sample),
    Enable(oneshot::Sender<Result<()>>),
    Disable,
    SetContact(String),
    Simulate(oneshot::Sender<Result<()>>),
    Cancel(oneshot::Sender<Result<()>>),
    Suspend,
    Resume,
    Tick,
    EscalationFinished(EscalationOutcome),
    /// Reply with the status once every earlier command has been handled.
    Flush(oneshot::Sender<MonitorStatus>),
    Shutdown,
}

/// Clock backed by `tokio::time::Instant`, so paused test time applies.
#[derive(Debug, Clone)]
pub struct TokioClock {
    origin: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Countdown timer that posts `Tick` commands into the monitor queue.
pub struct TokioTimer {
    commands: mpsc::Sender<MonitorCommand>,
    tasks: HashMap<TimerHandle, JoinHandle<()>>,
    next_id: u64,
}

impl TokioTimer {
    pub fn new(commands: mpsc::Sender<MonitorCommand>) -> Self {
        Self {
            commands,
            tasks: HashMap::new(),
            next_id: 0,
        }
    }
}

impl CountdownTimer for TokioTimer {
    fn schedule(&mut self, duration_ms: u64, tick_interval_ms: u64) -> TimerHandle {
        self.tasks.retain(|_, task| !task.is_finished());
        self.next_id += 1;
        let handle = TimerHandle(self.next_id);

        let tx = self.commands.clone();
        let interval_ms = tick_interval_ms.max(1);
        let ticks = duration_ms.div_ceil(interval_ms).max(1);
        let task = tokio::spawn(async move {
            let period = Duration::from_millis(interval_ms);
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            for _ in 0..ticks {
                interval.tick().await;
                if tx.send(MonitorCommand::Tick).await.is_err() {
                    return;
                }
            }
        });

        self.tasks.insert(handle, task);
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) {
        if let Some(task) = self.tasks.remove(&handle) {
            task.abort();
        }
    }
}

impl Drop for TokioTimer {
    fn drop(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}

/// Client side of a running monitor.
pub struct MonitorHandle {
    commands: mpsc::Sender<MonitorCommand>,
    status: watch::Receiver<MonitorStatus>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    async fn send(&self, command: MonitorCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SentinelError::MonitorClosed)
    }

    async fn request(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<()>>) -> MonitorCommand,
    ) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx)).await?;
        rx.await.map_err(|_| SentinelError::MonitorClosed)?
    }

    /// Deliver one accelerometer sample.
    pub async fn push_sample(&self, sample: Sample) -> Result<()> {
        self.send(MonitorCommand::Sample(sample)).await
    }

    pub async fn enable(&self) -> Result<()> {
        self.request(MonitorCommand::Enable).await
    }

    pub async fn disable(&self) -> Result<()> {
        self.send(MonitorCommand::Disable).await
    }

    pub async fn set_contact(&self, contact: impl Into<String>) -> Result<()> {
        self.send(MonitorCommand::SetContact(contact.into())).await
    }

    pub async fn simulate(&self) -> Result<()> {
        self.request(MonitorCommand::Simulate).await
    }

    pub async fn cancel(&self) -> Result<()> {
        self.request(MonitorCommand::Cancel).await
    }

    pub async fn suspend(&self) -> Result<()> {
        self.send(MonitorCommand::Suspend).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.send(MonitorCommand::Resume).await
    }

    /// Latest published status.
    pub fn status(&self) -> MonitorStatus {
        self.status.borrow().clone()
    }

    /// Status after every command queued so far has been processed.
    pub async fn flush(&self) -> Result<MonitorStatus> {
        let (tx, rx) = oneshot::channel();
        self.send(MonitorCommand::Flush(tx)).await?;
        rx.await.map_err(|_| SentinelError::MonitorClosed)
    }

    /// A receiver that is notified on every status change.
    pub fn subscribe(&self) -> watch::Receiver<MonitorStatus> {
        self.status.clone()
    }

    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(self) -> Result<()> {
        // The loop may already be gone; that is fine.
        let _ = self.commands.send(MonitorCommand::Shutdown).await;
        self.task
            .await
            .map_err(|e| SentinelError::Io(std::io::Error::other(e)))
    }
}

/// Build a controller on the tokio clock and timer and spawn its loop.
///
/// Must be called from within a tokio runtime.
pub fn spawn_monitor(config: &SentinelConfig, host: HostCapabilities) -> MonitorHandle {
    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
    let timer = TokioTimer::new(tx.clone());
    let mut controller =
        MonitoringController::new(config, host, Box::new(timer), Arc::new(TokioClock::new()));

    let (status_tx, status_rx) = watch::channel(controller.status().clone());
    controller.set_observer(Box::new(move |status| {
        status_tx.send_replace(status.clone());
    }));

    let task = tokio::spawn(run_loop(controller, rx, tx.clone()));
    MonitorHandle {
        commands: tx,
        status: status_rx,
        task,
    }
}

async fn run_loop(
    mut controller: MonitoringController,
    mut commands: mpsc::Receiver<MonitorCommand>,
    loopback: mpsc::Sender<MonitorCommand>,
) {
    tracing::info!("Monitor loop started");

    while let Some(command) = commands.recv().await {
        match command {
            MonitorCommand::Sample(sample) => {
                controller.on_sample(&sample);
            }
            MonitorCommand::Enable(reply) => {
                let _ = reply.send(controller.enable());
            }
            MonitorCommand::Disable => controller.disable(),
            MonitorCommand::SetContact(contact) => controller.set_contact(&contact),
            MonitorCommand::Simulate(reply) => {
                let _ = reply.send(controller.simulate());
            }
            MonitorCommand::Cancel(reply) => {
                let _ = reply.send(controller.cancel());
            }
            MonitorCommand::Suspend => controller.suspend(),
            MonitorCommand::Resume => controller.resume(),
            MonitorCommand::Tick => {
                if let Some(request) = controller.tick() {
                    let service = controller.escalation_service().clone();
                    let tx = loopback.clone();
                    tokio::spawn(async move {
                        let outcome = tokio::task::spawn_blocking(move || {
                            service.escalate(&request.contact, request.deadline_reached_at_ms)
                        })
                        .await
                        .unwrap_or_else(|e| {
                            tracing::error!(error = %e, "Escalation task panicked");
                            EscalationOutcome::Failed(FailureReason::SendFailure(
                                "escalation aborted".to_string(),
                            ))
                        });
                        let _ = tx.send(MonitorCommand::EscalationFinished(outcome)).await;
                    });
                }
            }
            MonitorCommand::EscalationFinished(outcome) => {
                if let Err(e) = controller.complete_escalation(outcome) {
                    tracing::warn!(error = %e, "Stale escalation result dropped");
                }
            }
            MonitorCommand::Flush(reply) => {
                let _ = reply.send(controller.status().clone());
            }
            MonitorCommand::Shutdown => break,
        }
    }

    tracing::info!("Monitor loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{MockLocation, MockPermissions, MockSender, MockSensor};
    use crate::types::LocationFix;

    fn host(sensor: &MockSensor, sender: &MockSender, location: MockLocation) -> HostCapabilities {
        HostCapabilities {
            sensor: Box::new(sensor.clone()),
            location: Arc::new(location),
            sender: Arc::new(sender.clone()),
            permissions: Arc::new(MockPermissions::granted()),
        }
    }

    async fn wait_for(
        rx: &mut watch::Receiver<MonitorStatus>,
        pred: impl Fn(&MonitorStatus) -> bool,
    ) -> MonitorStatus {
        loop {
            {
                let current = rx.borrow_and_update();
                if pred(&current) {
                    return current.clone();
                }
            }
            rx.changed().await.expect("monitor loop dropped status channel");
        }
    }

    async fn push_spike(handle: &MonitorHandle) {
        for i in 0..20 {
            handle.push_sample(Sample::new(i * 20, [0.0, 0.0, 9.81])).await.unwrap();
        }
        handle.push_sample(Sample::new(400, [60.0, 0.0, 9.81])).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_expires_and_sends() {
        let sensor = MockSensor::new();
        let sender = MockSender::new();
        let mut config = SentinelConfig::default();
        config.contact = Some("555-0100".into());
        let handle = spawn_monitor(
            &config,
            host(&sensor, &sender, MockLocation::fixed(LocationFix::new(1.234567, 2.345678))),
        );
        let mut status = handle.subscribe();

        handle.enable().await.unwrap();
        assert!(sensor.is_running());
        push_spike(&handle).await;

        wait_for(&mut status, |s| matches!(s, MonitorStatus::Pending { .. })).await;
        wait_for(&mut status, |s| *s == MonitorStatus::Sent).await;

        assert_eq!(
            sender.sent(),
            vec![(
                "555-0100".to_string(),
                "I may have been in an accident. My last known location: \
                 https://maps.google.com/?q=1.234567,2.345678"
                    .to_string()
            )]
        );
        assert!(sensor.is_running());
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_countdown() {
        let sensor = MockSensor::new();
        let sender = MockSender::new();
        let handle = spawn_monitor(
            &SentinelConfig::default(),
            host(&sensor, &sender, MockLocation::unavailable()),
        );
        let mut status = handle.subscribe();

        handle.set_contact("555-0100").await.unwrap();
        handle.enable().await.unwrap();
        handle.simulate().await.unwrap();
        assert!(!sensor.is_running());

        wait_for(&mut status, |s| *s == MonitorStatus::Pending { seconds_remaining: 25 }).await;
        handle.cancel().await.unwrap();
        assert_eq!(handle.status(), MonitorStatus::Canceled);
        assert!(sensor.is_running());

        // well past the original deadline: nothing is sent
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(sender.attempts(), 0);
        assert_eq!(handle.status(), MonitorStatus::Canceled);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_sees_queued_samples() {
        let sensor = MockSensor::new();
        let mut config = SentinelConfig::default();
        config.contact = Some("555-0100".into());
        let handle = spawn_monitor(
            &config,
            host(&sensor, &MockSender::new(), MockLocation::unavailable()),
        );

        handle.enable().await.unwrap();
        push_spike(&handle).await;
        assert_eq!(
            handle.flush().await.unwrap(),
            MonitorStatus::Pending {
                seconds_remaining: 30
            }
        );
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulate_requires_contact() {
        let sensor = MockSensor::new();
        let handle = spawn_monitor(
            &SentinelConfig::default(),
            host(&sensor, &MockSender::new(), MockLocation::unavailable()),
        );
        let err = handle.simulate().await.unwrap_err();
        assert!(matches!(err, SentinelError::InvalidContact));
        assert_eq!(handle.status(), MonitorStatus::InvalidContact);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_enable_without_sensor() {
        let handle = spawn_monitor(
            &SentinelConfig::default(),
            host(&MockSensor::unavailable(), &MockSender::new(), MockLocation::unavailable()),
        );
        assert!(matches!(
            handle.enable().await,
            Err(SentinelError::SensorUnavailable)
        ));
        assert_eq!(handle.status(), MonitorStatus::SensorUnavailable);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_monitor_reports_error() {
        let handle = spawn_monitor(
            &SentinelConfig::default(),
            host(&MockSensor::new(), &MockSender::new(), MockLocation::unavailable()),
        );
        let commands = handle.commands.clone();
        handle.shutdown().await.unwrap();
        assert!(commands.send(MonitorCommand::Disable).await.is_err());
    }
}
