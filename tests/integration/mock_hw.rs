//! Mock ports for integration tests.
//!
//! Every mock records its calls behind an `Arc` so tests keep a handle
//! after the mock itself has been boxed into the device.  Time is manual:
//! tests move the clock and the capture counter explicitly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use trichter::app::ports::{
    AdvertiserPort, AdvertisingMode, CalibrationPort, CaptureTimer, Clock, DisplayPort, Glyph,
    StatusLedPort, StatusPort, StorageError,
};
use trichter::app::service::{Device, DeviceParts};
use trichter::config::DeviceConfig;
use trichter::error::TransportError;
use trichter::transfer::{ConnHandle, IndicationTransport};

// ── Clock ─────────────────────────────────────────────────────

#[derive(Default)]
pub struct ManualClock(AtomicU64);

#[allow(dead_code)]
impl ManualClock {
    pub fn advance(&self, ms: u64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

// ── Capture timer ─────────────────────────────────────────────

#[derive(Default)]
pub struct ManualCaptureTimer {
    ticks: AtomicU32,
    running: AtomicBool,
    starts: AtomicU32,
}

#[allow(dead_code)]
impl ManualCaptureTimer {
    pub fn set_ticks(&self, ticks: u32) {
        self.ticks.store(ticks, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }
}

impl CaptureTimer for ManualCaptureTimer {
    fn now_ticks(&self) -> u32 {
        self.ticks.load(Ordering::SeqCst)
    }

    fn start(&self) {
        self.ticks.store(0, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

// ── Display ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayCall {
    Digits {
        digits: [u8; 4],
        brightness: u8,
        dot: Option<u8>,
    },
    Glyph(Glyph, u8),
    Clear,
}

pub struct RecordingDisplay(pub Arc<Mutex<Vec<DisplayCall>>>);

impl DisplayPort for RecordingDisplay {
    fn show_digits(&mut self, digits: [u8; 4], brightness: u8, dot: Option<u8>) {
        self.0.lock().unwrap().push(DisplayCall::Digits {
            digits,
            brightness,
            dot,
        });
    }

    fn show_glyph(&mut self, glyph: Glyph, brightness: u8) {
        self.0.lock().unwrap().push(DisplayCall::Glyph(glyph, brightness));
    }

    fn clear(&mut self) {
        self.0.lock().unwrap().push(DisplayCall::Clear);
    }
}

// ── LED ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct LedState {
    pub on: AtomicBool,
    pub toggles: AtomicU32,
}

pub struct RecordingLed(pub Arc<LedState>);

impl StatusLedPort for RecordingLed {
    fn set(&mut self, on: bool) {
        self.0.on.store(on, Ordering::SeqCst);
    }

    fn toggle(&mut self) {
        self.0.on.fetch_xor(true, Ordering::SeqCst);
        self.0.toggles.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Calibration storage ───────────────────────────────────────

#[derive(Default)]
pub struct StorageState {
    pub values: Mutex<HashMap<u16, u32>>,
    pub writes: AtomicU32,
    pub fail_reads: AtomicBool,
}

pub struct MemoryCalibration(pub Arc<StorageState>);

impl CalibrationPort for MemoryCalibration {
    fn read(&self, id: u16) -> Result<u32, StorageError> {
        if self.0.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::IoError);
        }
        self.0
            .values
            .lock()
            .unwrap()
            .get(&id)
            .copied()
            .ok_or(StorageError::NotFound)
    }

    fn write(&mut self, id: u16, value: u32) -> Result<(), StorageError> {
        self.0.values.lock().unwrap().insert(id, value);
        self.0.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ── Advertiser ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvCall {
    Start(AdvertisingMode),
    Stop,
}

pub struct RecordingAdvertiser(pub Arc<Mutex<Vec<AdvCall>>>);

impl AdvertiserPort for RecordingAdvertiser {
    fn start(&mut self, mode: AdvertisingMode) -> Result<(), TransportError> {
        self.0.lock().unwrap().push(AdvCall::Start(mode));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), TransportError> {
        self.0.lock().unwrap().push(AdvCall::Stop);
        Ok(())
    }
}

// ── Indication transport ──────────────────────────────────────

#[derive(Default)]
pub struct TransportState {
    pub sent: Mutex<Vec<Vec<u8>>>,
    pub dropped: Mutex<Vec<ConnHandle>>,
    pub fail_next: Mutex<Option<TransportError>>,
}

#[allow(dead_code)]
impl TransportState {
    pub fn packets(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }

    pub fn flags(&self) -> Vec<u8> {
        self.sent.lock().unwrap().iter().map(|p| p[0]).collect()
    }

    pub fn fail_next(&self, e: TransportError) {
        *self.fail_next.lock().unwrap() = Some(e);
    }
}

pub struct RecordingTransport(pub Arc<TransportState>);

impl IndicationTransport for RecordingTransport {
    fn indicate(&self, _conn: ConnHandle, packet: &[u8]) -> Result<(), TransportError> {
        if let Some(e) = self.0.fail_next.lock().unwrap().take() {
            return Err(e);
        }
        self.0.sent.lock().unwrap().push(packet.to_vec());
        Ok(())
    }

    fn disconnect(&self, conn: ConnHandle) {
        self.0.dropped.lock().unwrap().push(conn);
    }
}

// ── Status characteristic ─────────────────────────────────────

pub struct RecordingStatus(pub Arc<Mutex<Vec<u8>>>);

impl StatusPort for RecordingStatus {
    fn publish_status(&self, status: u8) {
        self.0.lock().unwrap().push(status);
    }
}

// ── Rig ───────────────────────────────────────────────────────

/// A complete device over mocks, plus handles to every recording.
pub struct Rig {
    pub device: Device,
    pub clock: Arc<ManualClock>,
    pub timer: Arc<ManualCaptureTimer>,
    pub display: Arc<Mutex<Vec<DisplayCall>>>,
    pub led: Arc<LedState>,
    pub storage: Arc<StorageState>,
    pub adv: Arc<Mutex<Vec<AdvCall>>>,
    pub transport: Arc<TransportState>,
    pub status: Arc<Mutex<Vec<u8>>>,
}

/// Config with a short ack timeout so a missing ack fails fast.
pub fn test_config() -> DeviceConfig {
    DeviceConfig {
        ack_timeout_ms: 200,
        ..DeviceConfig::default()
    }
}

#[allow(dead_code)]
impl Rig {
    pub fn new() -> Self {
        Self::with_storage(Arc::new(StorageState::default()))
    }

    pub fn with_storage(storage: Arc<StorageState>) -> Self {
        let clock = Arc::new(ManualClock::default());
        let timer = Arc::new(ManualCaptureTimer::default());
        let display = Arc::new(Mutex::new(Vec::new()));
        let led = Arc::new(LedState::default());
        let adv = Arc::new(Mutex::new(Vec::new()));
        let transport = Arc::new(TransportState::default());
        let status = Arc::new(Mutex::new(Vec::new()));

        let parts = DeviceParts {
            display: Box::new(RecordingDisplay(Arc::clone(&display))),
            led: Box::new(RecordingLed(Arc::clone(&led))),
            calibration: Box::new(MemoryCalibration(Arc::clone(&storage))),
            clock: clock.clone(),
            capture_timer: timer.clone(),
            advertiser: Box::new(RecordingAdvertiser(Arc::clone(&adv))),
            transport: Box::new(RecordingTransport(Arc::clone(&transport))),
            status: Arc::new(RecordingStatus(Arc::clone(&status))),
        };
        let device = Device::new(test_config(), parts).expect("device builds");

        Self {
            device,
            clock,
            timer,
            display,
            led,
            storage,
            adv,
            transport,
            status,
        }
    }

    /// Start the device and run the first lifecycle cycle (boot → READY).
    pub fn boot(&self) {
        self.device.start().unwrap();
        self.step();
    }

    pub fn step(&self) {
        self.device.lifecycle().step().unwrap();
    }

    pub fn step_adv(&self) {
        self.device.advertising().machine().step().unwrap();
    }

    /// Connect a subscribed peer.
    pub fn connect(&self, conn: ConnHandle) {
        assert!(self.device.link().on_connected(conn));
        self.device.link().on_subscription_changed(true);
    }

    pub fn ack(&self) {
        self.device.link().on_indication_complete(Ok(()));
    }

    /// Fire `n` pulses `spacing` ticks apart.  The first pulse of a burst
    /// lands at tick 0 since it restarts the capture timer.  Returns the
    /// recorded timestamps.
    pub fn pulses(&self, n: u32, spacing: u32) -> Vec<u32> {
        let mut stamps = Vec::new();
        for _ in 0..n {
            if self.device.pulses().is_running() {
                self.timer.set_ticks(self.timer.now_ticks() + spacing);
            }
            self.device.inputs().on_pulse_edge();
            stamps.push(self.timer.now_ticks());
        }
        stamps
    }

    /// Move the capture counter past the end-of-pour gap.
    pub fn end_pour(&self) {
        let last = self.device.pulses().latest().unwrap_or(0);
        self.timer
            .set_ticks(last + test_config().end_of_pour_ticks());
    }

    /// Close the qualification window opened by the last burst.
    pub fn close_burst_window(&self) {
        assert!(self.device.inputs().take_burst_opened());
        self.device.inputs().on_burst_window_elapsed();
    }

    pub fn last_display(&self) -> Option<DisplayCall> {
        self.display.lock().unwrap().last().copied()
    }

    pub fn last_status(&self) -> Option<u8> {
        self.status.lock().unwrap().last().copied()
    }

    pub fn adv_calls(&self) -> Vec<AdvCall> {
        self.adv.lock().unwrap().clone()
    }
}

/// Poll `cond` for up to `timeout`.
#[allow(dead_code)]
pub fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}
