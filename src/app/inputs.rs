//! Input routing: pulse edges, burst qualification, buttons, remote
//! commands and boot.
//!
//! ```text
//!   pulse edge ISR ──on_pulse_edge──▶ PulseCapture ──(first pulse)──▶ burst_pending
//!                                                                        │ (atomic)
//!   burst-window thread ──poll every 10 ms─────────────────────────────┘
//!        sleep(150 ms) ──on_burst_window_elapsed──▶ deferred RUNNING / cal valid / reset
//!
//!   button driver ──on_click──▶ request(READY | CALIBRATING) / advertise + drop link
//!   status write  ──on_remote_command──▶ deferred IDLE | READY | CALIBRATING
//! ```
//!
//! Everything reachable from interrupt or radio-stack context only uses
//! deferred transitions and atomics.  Button handlers run on the button
//! driver's thread and may take the lifecycle lock.

use super::commands::{ButtonClick, RemoteCommand};
use super::ports::CaptureTimer;
use crate::error::{FsmError, Result};
use crate::fsm::context::SharedFlags;
use crate::fsm::states::{LifecycleMachine, LifecycleState};
use crate::sensors::pulse::PulseCapture;
use crate::transfer::TransferEngine;
use core::sync::atomic::{AtomicBool, Ordering};
use log::{debug, info, warn};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How often the burst-window thread looks for a newly opened burst.
pub const BURST_POLL_PERIOD: Duration = Duration::from_millis(10);

pub struct InputRouter {
    machine: Arc<LifecycleMachine>,
    pulses: Arc<PulseCapture>,
    timer: Arc<dyn CaptureTimer>,
    engine: Arc<TransferEngine>,
    flags: Arc<SharedFlags>,
    burst_pending: AtomicBool,
    burst_window: Duration,
    burst_min_pulses: u16,
}

impl InputRouter {
    pub fn new(
        machine: Arc<LifecycleMachine>,
        pulses: Arc<PulseCapture>,
        timer: Arc<dyn CaptureTimer>,
        engine: Arc<TransferEngine>,
        flags: Arc<SharedFlags>,
        burst_window: Duration,
        burst_min_pulses: u16,
    ) -> Self {
        Self {
            machine,
            pulses,
            timer,
            engine,
            flags,
            burst_pending: AtomicBool::new(false),
            burst_window,
            burst_min_pulses,
        }
    }

    // ── Pulse capture ────────────────────────────────────────

    /// One flow-sensor edge.  Interrupt context: atomics only.
    ///
    /// The first edge of a burst clears the buffer, restarts the capture
    /// timer and opens the qualification window.
    pub fn on_pulse_edge(&self) {
        if !self.pulses.is_running() {
            self.pulses.reset();
            self.timer.start();
        }
        if self.pulses.record(self.timer.now_ticks()) {
            self.burst_pending.store(true, Ordering::Release);
        }
    }

    /// Whether a burst opened since the last call.  Used by the burst
    /// window thread and by tests that drive the window by hand.
    pub fn take_burst_opened(&self) -> bool {
        self.burst_pending.swap(false, Ordering::AcqRel)
    }

    /// The qualification window after a burst's first pulse has elapsed.
    ///
    /// Enough pulses in an idle or armed device start a measurement; in
    /// CALIBRATING they mark the attempt valid.  Anything else discards the
    /// burst.
    pub fn on_burst_window_elapsed(&self) {
        let count = self.pulses.pulse_count();
        let state = self.machine.current_state();

        if count < u32::from(self.burst_min_pulses) {
            debug!("INPUT: burst of {} pulses rejected", count);
            self.flags.set_calibration_valid(false);
            self.discard_burst();
            return;
        }

        match state {
            LifecycleState::Calibrating => {
                info!("INPUT: calibration burst qualified ({} pulses)", count);
                self.flags.set_calibration_valid(true);
            }
            LifecycleState::Idle | LifecycleState::Ready => {
                info!("INPUT: pour detected ({} pulses)", count);
                if let Err(e) = self.machine.transition_deferred(LifecycleState::Running) {
                    warn!("INPUT: cannot start measuring: {}", e);
                    self.discard_burst();
                }
            }
            other => {
                debug!("INPUT: burst ignored in {:?}", other);
                self.discard_burst();
            }
        }
    }

    fn discard_burst(&self) {
        self.pulses.reset();
        self.timer.stop();
    }

    // ── Buttons ──────────────────────────────────────────────

    pub fn on_click(&self, click: ButtonClick) {
        match click {
            ButtonClick::Single => self.on_single_click(),
            ButtonClick::Double => self.on_double_click(),
            ButtonClick::Long => self.on_long_click(),
        }
    }

    /// Arm the device, unless a transfer is in flight.
    pub fn on_single_click(&self) {
        if self.engine.is_sending() {
            debug!("INPUT: single click ignored while sending");
            return;
        }
        log_request(self.machine.request(LifecycleState::Ready));
    }

    /// Advertise once armed, and free the link for a new peer.
    pub fn on_double_click(&self) {
        self.flags.request_advertising();
        self.engine.disconnect_peer();
    }

    pub fn on_long_click(&self) {
        log_request(self.machine.request(LifecycleState::Calibrating));
    }

    // ── Remote / boot ────────────────────────────────────────

    /// One byte written by the peer to the status characteristic.
    /// Radio-stack context: deferred only.
    pub fn on_remote_command(&self, byte: u8) {
        match RemoteCommand::try_from(byte) {
            Ok(cmd) => {
                info!("INPUT: remote command {:?}", cmd);
                if let Err(e) = self.machine.transition_deferred(cmd.target()) {
                    warn!("INPUT: remote command {:?} rejected: {}", cmd, e);
                }
            }
            Err(other) => warn!("INPUT: unknown remote command {}", other),
        }
    }

    /// Boot: advertise once armed and arm on the first driver cycle.
    pub fn on_startup(&self) -> Result<()> {
        self.flags.request_advertising();
        self.machine.transition_deferred(LifecycleState::Ready)
    }

    /// Poll for an opened burst, wait out the window, then qualify it.
    /// The ISR only raises `burst_pending`; nothing here is woken from it.
    fn run_burst_window(&self) {
        loop {
            if self.take_burst_opened() {
                thread::sleep(self.burst_window);
                self.on_burst_window_elapsed();
            } else {
                thread::sleep(BURST_POLL_PERIOD);
            }
        }
    }
}

fn log_request(result: Result<()>) {
    match result {
        Ok(()) | Err(FsmError::TransitionForbidden) => {}
        Err(e) => warn!("INPUT: transition failed: {}", e),
    }
}

/// Spawn the thread that closes burst qualification windows.
pub fn spawn_burst_window(router: Arc<InputRouter>, stack_kb: usize) -> io::Result<JoinHandle<()>> {
    info!("Spawning 'burst-window' (stack={}KB)", stack_kb);
    thread::Builder::new()
        .name("burst-window".into())
        .stack_size(stack_kb * 1024)
        .spawn(move || router.run_burst_window())
}
