//! Context threaded through every lifecycle behaviour.
//!
//! `LifecycleContext` is the single struct the lifecycle states read from
//! and write to.  It owns the display, LED and calibration storage outright
//! and shares the pulse buffer, capture timer, transfer engine and
//! advertising handle with the contexts that feed them.
//!
//! ```text
//!   pulse ISR ──▶ PulseCapture ──┐
//!   buttons / BLE ──▶ SharedFlags ┤
//!                                 ▼
//!                       LifecycleContext ──▶ display / LED / NVS
//!                                 │
//!                                 ├──▶ TransferEngine (SENDING)
//!                                 └──▶ Advertising    (READY / RUNNING)
//! ```

use super::advertising::Advertising;
use super::timer::OneShot;
use super::MachineContext;
use crate::app::ports::{
    CALIBRATION_ID, CalibrationPort, CaptureTimer, Clock, DisplayPort, StatusLedPort,
};
use crate::config::DeviceConfig;
use crate::sensors::pulse::{MAX_TIMESTAMPS, PulseCapture};
use crate::transfer::TransferEngine;
use core::sync::atomic::{AtomicBool, Ordering};
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

/// Calibration constant used until one has been measured and persisted.
pub const DEFAULT_CALIBRATION: u32 = 300;

// ---------------------------------------------------------------------------
// Flags shared with interrupt and radio callbacks
// ---------------------------------------------------------------------------

/// Single-bit facts written outside the lifecycle lock.
#[derive(Debug, Default)]
pub struct SharedFlags {
    advertise_in_ready: AtomicBool,
    calibration_valid: AtomicBool,
}

impl SharedFlags {
    pub const fn new() -> Self {
        Self {
            advertise_in_ready: AtomicBool::new(false),
            calibration_valid: AtomicBool::new(false),
        }
    }

    /// READY should advertise (set at boot and on double click).
    pub fn request_advertising(&self) {
        self.advertise_in_ready.store(true, Ordering::Release);
    }

    pub fn clear_advertising(&self) {
        self.advertise_in_ready.store(false, Ordering::Release);
    }

    pub fn advertising_requested(&self) -> bool {
        self.advertise_in_ready.load(Ordering::Acquire)
    }

    pub fn set_calibration_valid(&self, valid: bool) {
        self.calibration_valid.store(valid, Ordering::Release);
    }

    /// Whether the last calibration attempt saw a qualifying burst.
    pub fn calibration_valid(&self) -> bool {
        self.calibration_valid.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Peripheral ports owned by the lifecycle machine.
pub struct LifecyclePorts {
    pub display: Box<dyn DisplayPort>,
    pub led: Box<dyn StatusLedPort>,
    pub calibration: Box<dyn CalibrationPort>,
    pub clock: Arc<dyn Clock>,
    pub capture_timer: Arc<dyn CaptureTimer>,
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

pub struct LifecycleContext {
    pub(super) config: DeviceConfig,
    pub(super) period_ms: u32,

    pub(super) display: Box<dyn DisplayPort>,
    pub(super) led: Box<dyn StatusLedPort>,
    pub(super) storage: Box<dyn CalibrationPort>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) capture_timer: Arc<dyn CaptureTimer>,

    pub(super) pulses: Arc<PulseCapture>,
    pub(super) engine: Arc<TransferEngine>,
    pub(super) advertising: Advertising,
    pub(super) flags: Arc<SharedFlags>,

    /// READY → IDLE after inactivity.
    pub(super) inactivity: OneShot,
    /// READY advertising window.
    pub(super) adv_window: OneShot,
    /// Upper bound on one SENDING session.
    pub(super) session: OneShot,

    pub(super) last_blink_ms: u64,
    pub(super) start_sent: bool,
    pub(super) calibration: u32,
    /// Pour frozen at SENDING entry, handed to the transfer engine.
    pub(super) scratch: [u32; MAX_TIMESTAMPS],
    pub(super) captured: usize,
}

impl LifecycleContext {
    /// Build the context and load the persisted calibration constant,
    /// falling back to [`DEFAULT_CALIBRATION`] on any storage failure.
    pub fn new(
        config: DeviceConfig,
        ports: LifecyclePorts,
        pulses: Arc<PulseCapture>,
        engine: Arc<TransferEngine>,
        advertising: Advertising,
        flags: Arc<SharedFlags>,
    ) -> Self {
        let calibration = match ports.calibration.read(CALIBRATION_ID) {
            Ok(value) => {
                info!("NVS: calibration constant {}", value);
                value
            }
            Err(e) => {
                warn!(
                    "NVS: no calibration constant ({}), defaulting to {}",
                    e, DEFAULT_CALIBRATION
                );
                DEFAULT_CALIBRATION
            }
        };
        let period_ms = config.fast_period_ms;

        Self {
            config,
            period_ms,
            display: ports.display,
            led: ports.led,
            storage: ports.calibration,
            clock: ports.clock,
            capture_timer: ports.capture_timer,
            pulses,
            engine,
            advertising,
            flags,
            inactivity: OneShot::new(),
            adv_window: OneShot::new(),
            session: OneShot::new(),
            last_blink_ms: 0,
            start_sent: false,
            calibration,
            scratch: [0; MAX_TIMESTAMPS],
            captured: 0,
        }
    }

    pub fn calibration_value(&self) -> u32 {
        self.calibration
    }

    pub fn period_ms(&self) -> u32 {
        self.period_ms
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub(super) fn set_fast_period(&mut self) {
        self.period_ms = self.config.fast_period_ms;
    }

    pub(super) fn set_slow_period(&mut self) {
        self.period_ms = self.config.slow_period_ms;
    }

    pub(super) fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Drop the captured burst and halt the capture timer.
    pub(super) fn reset_capture(&mut self) {
        self.pulses.reset();
        self.capture_timer.stop();
    }
}

impl MachineContext for LifecycleContext {
    fn period(&self) -> Duration {
        Duration::from_millis(u64::from(self.period_ms))
    }
}
