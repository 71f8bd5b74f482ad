//! C FFI Bindings for Mobile Hosts
//!
//! This module exposes the crash sentinel to native mobile code via C ABI.
//! The host supplies its capabilities (sensor toggling, location, SMS,
//! permissions, timer, clock) as a table of callbacks and pushes samples and
//! countdown ticks into the engine.
//!
//! Memory Safety:
//! - All returned strings must be freed with `sentinel_free_string()`
//! - The engine instance must be freed with `sentinel_engine_destroy()`
//! - NULL checks are performed on all inputs
//!
//! Thread Safety:
//! - The engine is NOT thread-safe. Call it from one thread (or behind a mutex).
//! - Escalation runs inside `sentinel_tick()`, so the location and send
//!   callbacks are invoked synchronously on the calling thread.

use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use std::sync::Arc;

use crate::capabilities::{
    Clock, CountdownTimer, LocationPriority, LocationProvider, MessageSender, PermissionGate,
    SensorSource, SystemClock, TimerHandle,
};
use crate::config::SentinelConfig;
use crate::controller::{HostCapabilities, MonitoringController};
use crate::error::{LocationError, SendError, SentinelError};
use crate::types::{Capability, LocationFix, MonitorStatus, Sample};

// ============================================================================
// C TYPES
// ============================================================================

/// Result status codes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentinelStatus {
    /// Operation succeeded.
    Ok = 0,
    /// Null pointer provided.
    NullPointer = 1,
    /// Invalid parameter value (e.g. non-UTF-8 string).
    InvalidParameter = 2,
    /// Emergency contact is empty.
    InvalidContact = 3,
    /// An alert is already running.
    AlertAlreadyActive = 4,
    /// Nothing to cancel.
    NoActiveSession = 5,
    /// Countdown already expired; escalation cannot be canceled.
    CancellationRejected = 6,
    /// No accelerometer on this device.
    SensorUnavailable = 7,
    /// Internal error.
    InternalError = 8,
}

impl From<&SentinelError> for SentinelStatus {
    fn from(err: &SentinelError) -> Self {
        match err {
            SentinelError::InvalidContact => SentinelStatus::InvalidContact,
            SentinelError::AlertAlreadyActive => SentinelStatus::AlertAlreadyActive,
            SentinelError::NoActiveSession => SentinelStatus::NoActiveSession,
            SentinelError::CancellationRejected => SentinelStatus::CancellationRejected,
            SentinelError::SensorUnavailable => SentinelStatus::SensorUnavailable,
            SentinelError::Config(_) | SentinelError::ConfigParse(_) => {
                SentinelStatus::InvalidParameter
            }
            _ => SentinelStatus::InternalError,
        }
    }
}

/// A location written by the host.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SentinelLocation {
    pub latitude: f64,
    pub longitude: f64,
}

/// Capability code passed to `has_permission`.
pub const SENTINEL_CAP_LOCATION: i32 = 0;
/// Capability code passed to `has_permission`.
pub const SENTINEL_CAP_SMS: i32 = 1;

/// Host callback table. Every entry is optional; a missing callback behaves
/// as "capability not present".
///
/// Location callbacks return 1 when `out` was filled, 0 when no fix is
/// available, and a negative value on error. `send_message` returns 0 on
/// success. `request_permissions` receives a bitmask of
/// `1 << SENTINEL_CAP_*`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SentinelHostCallbacks {
    pub user_data: *mut c_void,
    pub sensor_available: Option<unsafe extern "C" fn(*mut c_void) -> i32>,
    pub sensor_start: Option<unsafe extern "C" fn(*mut c_void)>,
    pub sensor_stop: Option<unsafe extern "C" fn(*mut c_void)>,
    pub last_known_location: Option<unsafe extern "C" fn(*mut c_void, *mut SentinelLocation) -> i32>,
    pub fresh_location: Option<unsafe extern "C" fn(*mut c_void, *mut SentinelLocation) -> i32>,
    pub send_message: Option<unsafe extern "C" fn(*mut c_void, *const c_char, *const c_char) -> i32>,
    pub has_permission: Option<unsafe extern "C" fn(*mut c_void, i32) -> i32>,
    pub request_permissions: Option<unsafe extern "C" fn(*mut c_void, u32)>,
    pub schedule_timer: Option<unsafe extern "C" fn(*mut c_void, u64, u64, u64)>,
    pub cancel_timer: Option<unsafe extern "C" fn(*mut c_void, u64)>,
    pub now_ms: Option<unsafe extern "C" fn(*mut c_void) -> u64>,
}

// ============================================================================
// HOST BRIDGE
// ============================================================================

/// Capability adapter over the host callback table.
#[derive(Clone, Copy)]
struct HostBridge {
    callbacks: SentinelHostCallbacks,
}

// Safety: the engine is single-threaded by contract; the host guarantees its
// callbacks and `user_data` stay valid for the engine's lifetime.
unsafe impl Send for HostBridge {}
unsafe impl Sync for HostBridge {}

fn capability_code(capability: Capability) -> i32 {
    match capability {
        Capability::Location => SENTINEL_CAP_LOCATION,
        Capability::Sms => SENTINEL_CAP_SMS,
    }
}

impl HostBridge {
    fn fetch(
        &self,
        callback: Option<unsafe extern "C" fn(*mut c_void, *mut SentinelLocation) -> i32>,
    ) -> Result<Option<LocationFix>, LocationError> {
        let Some(callback) = callback else {
            return Ok(None);
        };
        let mut out = SentinelLocation::default();
        let code = unsafe { callback(self.callbacks.user_data, &mut out) };
        match code {
            1 => Ok(Some(LocationFix::new(out.latitude, out.longitude))),
            0 => Ok(None),
            code => Err(LocationError::Provider(format!("host error {}", code))),
        }
    }
}

impl SensorSource for HostBridge {
    fn is_available(&self) -> bool {
        match self.callbacks.sensor_available {
            Some(f) => unsafe { f(self.callbacks.user_data) != 0 },
            None => false,
        }
    }

    fn start(&mut self) {
        if let Some(f) = self.callbacks.sensor_start {
            unsafe { f(self.callbacks.user_data) }
        }
    }

    fn stop(&mut self) {
        if let Some(f) = self.callbacks.sensor_stop {
            unsafe { f(self.callbacks.user_data) }
        }
    }
}

impl LocationProvider for HostBridge {
    fn last_known(&self) -> Result<Option<LocationFix>, LocationError> {
        self.fetch(self.callbacks.last_known_location)
    }

    fn fresh_fix(&self, _priority: LocationPriority) -> Result<Option<LocationFix>, LocationError> {
        self.fetch(self.callbacks.fresh_location)
    }
}

impl MessageSender for HostBridge {
    fn send(&self, recipient: &str, body: &str) -> Result<(), SendError> {
        let Some(f) = self.callbacks.send_message else {
            return Err(SendError::Unavailable);
        };
        let recipient =
            CString::new(recipient).map_err(|_| SendError::Rejected("invalid recipient".into()))?;
        let body = CString::new(body).map_err(|_| SendError::Rejected("invalid body".into()))?;

        match unsafe { f(self.callbacks.user_data, recipient.as_ptr(), body.as_ptr()) } {
            0 => Ok(()),
            code => Err(SendError::Rejected(format!("host error {}", code))),
        }
    }
}

impl PermissionGate for HostBridge {
    fn has(&self, capability: Capability) -> bool {
        match self.callbacks.has_permission {
            Some(f) => unsafe { f(self.callbacks.user_data, capability_code(capability)) != 0 },
            None => false,
        }
    }

    fn request(&self, capabilities: &[Capability]) {
        if let Some(f) = self.callbacks.request_permissions {
            let mask = capabilities
                .iter()
                .fold(0u32, |mask, cap| mask | (1 << capability_code(*cap)));
            unsafe { f(self.callbacks.user_data, mask) }
        }
    }
}

/// Countdown timer delegated to the host. The host calls `sentinel_tick()`
/// on every interval until the handle is canceled.
struct HostTimer {
    bridge: HostBridge,
    next_id: u64,
}

impl CountdownTimer for HostTimer {
    fn schedule(&mut self, duration_ms: u64, tick_interval_ms: u64) -> TimerHandle {
        self.next_id += 1;
        if let Some(f) = self.bridge.callbacks.schedule_timer {
            unsafe { f(self.bridge.callbacks.user_data, self.next_id, duration_ms, tick_interval_ms) }
        }
        TimerHandle(self.next_id)
    }

    fn cancel(&mut self, handle: TimerHandle) {
        if let Some(f) = self.bridge.callbacks.cancel_timer {
            unsafe { f(self.bridge.callbacks.user_data, handle.0) }
        }
    }
}

/// Host clock, falling back to the process clock when not supplied.
struct HostClock {
    bridge: HostBridge,
    fallback: SystemClock,
}

impl Clock for HostClock {
    fn now_ms(&self) -> u64 {
        match self.bridge.callbacks.now_ms {
            Some(f) => unsafe { f(self.bridge.callbacks.user_data) },
            None => self.fallback.now_ms(),
        }
    }
}

// ============================================================================
// ENGINE LIFECYCLE
// ============================================================================

/// Opaque handle to the sentinel engine.
pub struct SentinelEngine {
    controller: MonitoringController,
}

unsafe fn read_str<'a>(s: *const c_char) -> Option<&'a str> {
    if s.is_null() {
        return None;
    }
    CStr::from_ptr(s).to_str().ok()
}

fn report(result: crate::error::Result<()>) -> SentinelStatus {
    match result {
        Ok(()) => SentinelStatus::Ok,
        Err(e) => SentinelStatus::from(&e),
    }
}

/// Create a new engine with default configuration.
///
/// # Safety
/// - `callbacks` must point to a valid callback table that outlives the engine.
/// - `contact` may be NULL; otherwise it must be a valid null-terminated C string.
/// - The returned pointer must be freed with `sentinel_engine_destroy()`.
///
/// # Returns
/// - Pointer to SentinelEngine on success.
/// - NULL on failure.
#[no_mangle]
pub unsafe extern "C" fn sentinel_engine_create(
    callbacks: *const SentinelHostCallbacks,
    contact: *const c_char,
) -> *mut SentinelEngine {
    if callbacks.is_null() {
        return ptr::null_mut();
    }
    let bridge = HostBridge {
        callbacks: *callbacks,
    };

    let mut config = SentinelConfig::default();
    config.contact = read_str(contact).map(str::to_string);

    let host = HostCapabilities {
        sensor: Box::new(bridge),
        location: Arc::new(bridge),
        sender: Arc::new(bridge),
        permissions: Arc::new(bridge),
    };
    let timer = Box::new(HostTimer { bridge, next_id: 0 });
    let clock = Arc::new(HostClock {
        bridge,
        fallback: SystemClock::new(),
    });

    let engine = Box::new(SentinelEngine {
        controller: MonitoringController::new(&config, host, timer, clock),
    });
    Box::into_raw(engine)
}

/// Destroy an engine instance.
///
/// # Safety
/// - `engine` must be a valid pointer from `sentinel_engine_create()`.
/// - Must not be called more than once for the same pointer.
#[no_mangle]
pub unsafe extern "C" fn sentinel_engine_destroy(engine: *mut SentinelEngine) {
    if !engine.is_null() {
        drop(Box::from_raw(engine));
    }
}

// ============================================================================
// CONTROL
// ============================================================================

/// Set the emergency contact.
///
/// # Safety
/// - `engine` must be a valid pointer.
/// - `contact` must be a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn sentinel_set_contact(
    engine: *mut SentinelEngine,
    contact: *const c_char,
) -> SentinelStatus {
    if engine.is_null() || contact.is_null() {
        return SentinelStatus::NullPointer;
    }
    let Some(contact) = read_str(contact) else {
        return SentinelStatus::InvalidParameter;
    };
    (*engine).controller.set_contact(contact);
    SentinelStatus::Ok
}

/// Switch detection on.
///
/// # Safety
/// - `engine` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn sentinel_enable(engine: *mut SentinelEngine) -> SentinelStatus {
    if engine.is_null() {
        return SentinelStatus::NullPointer;
    }
    report((*engine).controller.enable())
}

/// Switch detection off.
///
/// # Safety
/// - `engine` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn sentinel_disable(engine: *mut SentinelEngine) -> SentinelStatus {
    if engine.is_null() {
        return SentinelStatus::NullPointer;
    }
    (*engine).controller.disable();
    SentinelStatus::Ok
}

/// Host went to the background.
///
/// # Safety
/// - `engine` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn sentinel_suspend(engine: *mut SentinelEngine) -> SentinelStatus {
    if engine.is_null() {
        return SentinelStatus::NullPointer;
    }
    (*engine).controller.suspend();
    SentinelStatus::Ok
}

/// Host came back to the foreground.
///
/// # Safety
/// - `engine` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn sentinel_resume(engine: *mut SentinelEngine) -> SentinelStatus {
    if engine.is_null() {
        return SentinelStatus::NullPointer;
    }
    (*engine).controller.resume();
    SentinelStatus::Ok
}

/// Process a single accelerometer sample.
///
/// # Safety
/// - `engine` must be a valid pointer.
/// - `impact_detected` may be NULL; otherwise receives 1 if this sample
///   triggered an impact, 0 otherwise.
///
/// # Parameters
/// - `timestamp_ms`: Sample timestamp in milliseconds.
/// - `accel_x/y/z`: Accelerometer readings in m/s².
#[no_mangle]
pub unsafe extern "C" fn sentinel_process_sample(
    engine: *mut SentinelEngine,
    timestamp_ms: u64,
    accel_x: f32,
    accel_y: f32,
    accel_z: f32,
    impact_detected: *mut i32,
) -> SentinelStatus {
    if engine.is_null() {
        return SentinelStatus::NullPointer;
    }
    let sample = Sample::new(timestamp_ms, [accel_x, accel_y, accel_z]);
    let impact = (*engine).controller.on_sample(&sample).is_some();
    if !impact_detected.is_null() {
        *impact_detected = impact as i32;
    }
    SentinelStatus::Ok
}

/// Countdown tick. Call on every interval scheduled through
/// `schedule_timer`. When the deadline has passed this runs the escalation
/// (location lookup and send) before returning.
///
/// # Safety
/// - `engine` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn sentinel_tick(engine: *mut SentinelEngine) -> SentinelStatus {
    if engine.is_null() {
        return SentinelStatus::NullPointer;
    }
    report((*engine).controller.tick_and_escalate().map(|_| ()))
}

/// User pressed cancel.
///
/// # Safety
/// - `engine` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn sentinel_cancel(engine: *mut SentinelEngine) -> SentinelStatus {
    if engine.is_null() {
        return SentinelStatus::NullPointer;
    }
    report((*engine).controller.cancel())
}

/// Start an alert without an impact.
///
/// # Safety
/// - `engine` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn sentinel_simulate(engine: *mut SentinelEngine) -> SentinelStatus {
    if engine.is_null() {
        return SentinelStatus::NullPointer;
    }
    report((*engine).controller.simulate())
}

// ============================================================================
// STATUS QUERIES
// ============================================================================

/// Get the current status code.
///
/// 0=Disabled, 1=Armed, 2=Pending, 3=Canceled, 4=Sending, 5=Sent, 6=Failed,
/// 7=MissingPermission, 8=SensorUnavailable, 9=InvalidContact.
///
/// # Safety
/// - `engine` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn sentinel_status_code(engine: *const SentinelEngine) -> i32 {
    if engine.is_null() {
        return -1;
    }
    match (*engine).controller.status() {
        MonitorStatus::Disabled => 0,
        MonitorStatus::Armed => 1,
        MonitorStatus::Pending { .. } => 2,
        MonitorStatus::Canceled => 3,
        MonitorStatus::Sending => 4,
        MonitorStatus::Sent => 5,
        MonitorStatus::Failed { .. } => 6,
        MonitorStatus::MissingPermission(_) => 7,
        MonitorStatus::SensorUnavailable => 8,
        MonitorStatus::InvalidContact => 9,
    }
}

/// Seconds left on the countdown, or -1 when no countdown is pending.
///
/// # Safety
/// - `engine` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn sentinel_seconds_remaining(engine: *const SentinelEngine) -> i64 {
    if engine.is_null() {
        return -1;
    }
    match (*engine).controller.status() {
        MonitorStatus::Pending { seconds_remaining } => *seconds_remaining as i64,
        _ => -1,
    }
}

/// Get the status line, e.g. "alert pending (30 s)".
///
/// # Safety
/// - `engine` must be a valid pointer.
///
/// # Returns
/// - String that MUST be freed with `sentinel_free_string()`.
/// - NULL on error.
#[no_mangle]
pub unsafe extern "C" fn sentinel_status_text(engine: *const SentinelEngine) -> *mut c_char {
    if engine.is_null() {
        return ptr::null_mut();
    }
    match CString::new((*engine).controller.status().to_string()) {
        Ok(s) => s.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Free a string returned by this library.
///
/// # Safety
/// - `ptr` must be a string returned by `sentinel_status_text()`.
/// - Must not be called more than once for the same pointer.
#[no_mangle]
pub unsafe extern "C" fn sentinel_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// VERSION INFO
// ============================================================================

/// Get the library version string.
///
/// # Returns
/// - Static string, do NOT free.
#[no_mangle]
pub extern "C" fn sentinel_version() -> *const c_char {
    static VERSION: &[u8] = concat!("crash-sentinel/", env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

// ============================================================================
// TESTS
// ============================================================================
