//! Host capability traits.
//!
//! The sentinel never talks to hardware or the OS directly. Everything it
//! needs from the host (sensor delivery, location, messaging, time,
//! permissions) is injected through the traits below.
//!
//! # Design
//!
//! - Traits are synchronous; the async runtime moves slow calls off the
//!   controlling loop and posts their completion back.
//! - Mock implementations are always available for host testing. They share
//!   their state through an `Arc`, so a test can keep a clone for inspection
//!   after handing one to the controller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::error::{LocationError, SendError};
use crate::types::{Capability, LocationFix};

// ============================================================================
// TRAITS
// ============================================================================

/// Accelerometer stream owned by the host.
///
/// `start`/`stop` toggle delivery; samples themselves are pushed into the
/// controller by the host adapter.
pub trait SensorSource: Send {
    /// Whether the device has an accelerometer at all.
    fn is_available(&self) -> bool;

    /// Begin delivering samples.
    fn start(&mut self);

    /// Stop delivering samples.
    fn stop(&mut self);
}

/// Accuracy requested for a fresh location fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationPriority {
    HighAccuracy,
    Balanced,
}

/// Position source.
pub trait LocationProvider: Send + Sync {
    /// Cached last-known position. Fast, may be absent.
    fn last_known(&self) -> Result<Option<LocationFix>, LocationError>;

    /// Request a new fix. Slower, may fail.
    fn fresh_fix(&self, priority: LocationPriority) -> Result<Option<LocationFix>, LocationError>;
}

/// Text-message channel.
pub trait MessageSender: Send + Sync {
    fn send(&self, recipient: &str, body: &str) -> Result<(), SendError>;
}

/// Monotonic millisecond clock.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Identifies one scheduled countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub u64);

/// Countdown scheduler. Ticks and expiry are delivered back to the
/// controller as `tick(now)` calls by whatever drives the timer.
pub trait CountdownTimer: Send {
    /// Schedule a countdown of `duration_ms`, ticking every `tick_interval_ms`.
    fn schedule(&mut self, duration_ms: u64, tick_interval_ms: u64) -> TimerHandle;

    /// Cancel a countdown. Unknown or already-finished handles are ignored.
    fn cancel(&mut self, handle: TimerHandle);
}

/// Runtime permission checks.
pub trait PermissionGate: Send + Sync {
    fn has(&self, capability: Capability) -> bool;

    /// Ask the host to prompt for the given capabilities. Fire-and-forget.
    fn request(&self, capabilities: &[Capability]);
}

/// Ask for whichever of `capabilities` are not yet granted. Returns the ones
/// that were missing.
pub fn request_missing(gate: &dyn PermissionGate, capabilities: &[Capability]) -> Vec<Capability> {
    let missing: Vec<Capability> = capabilities
        .iter()
        .copied()
        .filter(|cap| !gate.has(*cap))
        .collect();
    if !missing.is_empty() {
        tracing::info!(?missing, "Requesting permissions");
        gate.request(&missing);
    }
    missing
}

// ============================================================================
// SYSTEM CLOCK
// ============================================================================

/// Wall-independent clock based on `Instant`, counting from construction.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

// ============================================================================
// MOCKS (always available for testing)
// ============================================================================

/// Controllable clock.
#[derive(Debug, Clone, Default)]
pub struct MockClock {
    now_ms: Arc<AtomicU64>,
}

impl MockClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial(ms: u64) -> Self {
        let clock = Self::new();
        clock.set(ms);
        clock
    }

    pub fn set(&self, ms: u64) {
        self.now_ms.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct MockTimerState {
    next_id: u64,
    scheduled: Vec<(TimerHandle, u64, u64)>,
    canceled: Vec<TimerHandle>,
}

/// Timer that only records what it was asked to do. Tests drive ticks by
/// calling the controller directly.
#[derive(Debug, Clone, Default)]
pub struct MockTimer {
    state: Arc<Mutex<MockTimerState>>,
}

impl MockTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of countdowns scheduled so far.
    pub fn scheduled_count(&self) -> usize {
        self.state.lock().scheduled.len()
    }

    /// (handle, duration_ms, tick_interval_ms) of the latest schedule.
    pub fn last_scheduled(&self) -> Option<(TimerHandle, u64, u64)> {
        self.state.lock().scheduled.last().copied()
    }

    pub fn canceled(&self) -> Vec<TimerHandle> {
        self.state.lock().canceled.clone()
    }
}

impl CountdownTimer for MockTimer {
    fn schedule(&mut self, duration_ms: u64, tick_interval_ms: u64) -> TimerHandle {
        let mut state = self.state.lock();
        state.next_id += 1;
        let handle = TimerHandle(state.next_id);
        state.scheduled.push((handle, duration_ms, tick_interval_ms));
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.state.lock().canceled.push(handle);
    }
}

#[derive(Debug)]
struct MockSensorState {
    available: bool,
    running: bool,
    starts: usize,
    stops: usize,
}

/// Sensor that tracks whether delivery is on.
#[derive(Debug, Clone)]
pub struct MockSensor {
    state: Arc<Mutex<MockSensorState>>,
}

impl MockSensor {
    pub fn new() -> Self {
        Self::with_availability(true)
    }

    /// A device without an accelerometer.
    pub fn unavailable() -> Self {
        Self::with_availability(false)
    }

    fn with_availability(available: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockSensorState {
                available,
                running: false,
                starts: 0,
                stops: 0,
            })),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn start_count(&self) -> usize {
        self.state.lock().starts
    }

    pub fn stop_count(&self) -> usize {
        self.state.lock().stops
    }
}

impl Default for MockSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorSource for MockSensor {
    fn is_available(&self) -> bool {
        self.state.lock().available
    }

    fn start(&mut self) {
        let mut state = self.state.lock();
        state.running = true;
        state.starts += 1;
    }

    fn stop(&mut self) {
        let mut state = self.state.lock();
        state.running = false;
        state.stops += 1;
    }
}

/// Canned response for a mock location request.
pub type MockFixResult = Result<Option<LocationFix>, LocationError>;

#[derive(Debug)]
struct MockLocationState {
    last_known: MockFixResult,
    fresh: MockFixResult,
    last_known_calls: usize,
    fresh_calls: usize,
}

/// Location provider with scripted answers.
#[derive(Debug, Clone)]
pub struct MockLocation {
    state: Arc<Mutex<MockLocationState>>,
}

impl MockLocation {
    pub fn new(last_known: MockFixResult, fresh: MockFixResult) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockLocationState {
                last_known,
                fresh,
                last_known_calls: 0,
                fresh_calls: 0,
            })),
        }
    }

    /// Both paths return nothing.
    pub fn unavailable() -> Self {
        Self::new(Ok(None), Ok(None))
    }

    /// Fast path answers with `fix`.
    pub fn fixed(fix: LocationFix) -> Self {
        Self::new(Ok(Some(fix)), Ok(None))
    }

    pub fn last_known_calls(&self) -> usize {
        self.state.lock().last_known_calls
    }

    pub fn fresh_calls(&self) -> usize {
        self.state.lock().fresh_calls
    }
}

impl LocationProvider for MockLocation {
    fn last_known(&self) -> Result<Option<LocationFix>, LocationError> {
        let mut state = self.state.lock();
        state.last_known_calls += 1;
        state.last_known.clone()
    }

    fn fresh_fix(&self, _priority: LocationPriority) -> Result<Option<LocationFix>, LocationError> {
        let mut state = self.state.lock();
        state.fresh_calls += 1;
        state.fresh.clone()
    }
}

#[derive(Debug, Default)]
struct MockSenderState {
    fail_with: Option<SendError>,
    sent: Vec<(String, String)>,
    attempts: usize,
}

/// Message channel that records every send.
#[derive(Debug, Clone, Default)]
pub struct MockSender {
    state: Arc<Mutex<MockSenderState>>,
}

impl MockSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// A channel whose every send fails with `error`.
    pub fn failing(error: SendError) -> Self {
        let sender = Self::new();
        sender.state.lock().fail_with = Some(error);
        sender
    }

    /// (recipient, body) pairs successfully sent.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.state.lock().sent.clone()
    }

    /// Send attempts, successful or not.
    pub fn attempts(&self) -> usize {
        self.state.lock().attempts
    }
}

impl MessageSender for MockSender {
    fn send(&self, recipient: &str, body: &str) -> Result<(), SendError> {
        let mut state = self.state.lock();
        state.attempts += 1;
        if let Some(err) = state.fail_with.clone() {
            return Err(err);
        }
        state.sent.push((recipient.to_string(), body.to_string()));
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MockPermissionState {
    granted: Vec<Capability>,
    requests: Vec<Vec<Capability>>,
}

/// Permission gate with a fixed grant list.
#[derive(Debug, Clone, Default)]
pub struct MockPermissions {
    state: Arc<Mutex<MockPermissionState>>,
}

impl MockPermissions {
    /// Everything granted.
    pub fn granted() -> Self {
        Self::with_granted(&Capability::ALL)
    }

    /// Only `granted` capabilities are available.
    pub fn with_granted(granted: &[Capability]) -> Self {
        let gate = Self::default();
        gate.state.lock().granted = granted.to_vec();
        gate
    }

    pub fn grant(&self, capability: Capability) {
        let mut state = self.state.lock();
        if !state.granted.contains(&capability) {
            state.granted.push(capability);
        }
    }

    /// Every batch passed to `request`.
    pub fn requests(&self) -> Vec<Vec<Capability>> {
        self.state.lock().requests.clone()
    }
}

impl PermissionGate for MockPermissions {
    fn has(&self, capability: Capability) -> bool {
        self.state.lock().granted.contains(&capability)
    }

    fn request(&self, capabilities: &[Capability]) {
        self.state.lock().requests.push(capabilities.to_vec());
    }
}
