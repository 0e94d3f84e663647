//! Device lifecycle: state identities, table and behaviours.
//!
//! Each state is three plain `fn` pointers over [`LifecycleContext`].  No
//! closures, no dynamic dispatch in the table itself.
//!
//! ```text
//!            boot (deferred)
//!  IDLE ──────────────────▶ READY ◀──────────────┐
//!   │ ▲                      │  │                │
//!   │ └──[120 s inactive]────┘  │ long click     │ burst end
//!   │                           ▼                │
//!   │   burst qualified    CALIBRATING ──────────┘
//!   ├──────────────────▶ RUNNING ◀── burst qualified (from READY)
//!   │                        │
//!   │               [gap ≥ 1 s of ticks]
//!   │                        ▼
//!   │                     SENDING ──[END sent / 30 s]──▶ READY
//!   │
//!   └──[run failure anywhere]──▶ ERROR (terminal)
//! ```

use super::context::LifecycleContext;
use super::{StateDescriptor, StateId, StateMachine, no_impl, stay};
use crate::app::ports::{BRIGHTNESS_MAX, BRIGHTNESS_MID, CALIBRATION_ID, Glyph};
use crate::error::{FsmError, Result};
use crate::transfer::ChunkSent;
use log::{debug, error, info, warn};

/// Brightness of the READY glyph.
const READY_BRIGHTNESS: u8 = 2;
/// Decimal point position for elapsed-time rendering (after the seconds).
const SECONDS_DOT: Option<u8> = Some(1);

// ---------------------------------------------------------------------------
// State identity
// ---------------------------------------------------------------------------

/// Lifecycle states.  Discriminants are table indices and the low nibble
/// of the status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LifecycleState {
    Idle = 0,
    Ready = 1,
    Running = 2,
    Sending = 3,
    Calibrating = 4,
    Error = 5,
}

impl StateId for LifecycleState {
    const COUNT: usize = 6;
    const ERROR: Self = Self::Error;

    fn index(self) -> usize {
        self as usize
    }

    fn from_index(idx: usize) -> Option<Self> {
        match idx {
            0 => Some(Self::Idle),
            1 => Some(Self::Ready),
            2 => Some(Self::Running),
            3 => Some(Self::Sending),
            4 => Some(Self::Calibrating),
            5 => Some(Self::Error),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Ready => "Ready",
            Self::Running => "Running",
            Self::Sending => "Sending",
            Self::Calibrating => "Calibrating",
            Self::Error => "Error",
        }
    }
}

pub type LifecycleMachine = StateMachine<LifecycleState, LifecycleContext>;

// ═══════════════════════════════════════════════════════════════════════════
//  Table
// ═══════════════════════════════════════════════════════════════════════════

use LifecycleState as L;

pub static LIFECYCLE_TABLE: [StateDescriptor<LifecycleState, LifecycleContext>;
    LifecycleState::COUNT] = [
    // Index 0: Idle
    StateDescriptor {
        id: L::Idle,
        on_entry: idle_entry,
        on_run: stay,
        on_exit: idle_exit,
        allowed: [Some(L::Running), Some(L::Ready), Some(L::Error), None, None],
    },
    // Index 1: Ready
    StateDescriptor {
        id: L::Ready,
        on_entry: ready_entry,
        on_run: ready_run,
        on_exit: ready_exit,
        allowed: [
            Some(L::Running),
            Some(L::Idle),
            Some(L::Calibrating),
            None,
            None,
        ],
    },
    // Index 2: Running
    StateDescriptor {
        id: L::Running,
        on_entry: running_entry,
        on_run: running_run,
        on_exit: running_exit,
        allowed: [Some(L::Sending), Some(L::Error), None, None, None],
    },
    // Index 3: Sending
    StateDescriptor {
        id: L::Sending,
        on_entry: sending_entry,
        on_run: sending_run,
        on_exit: sending_exit,
        allowed: [Some(L::Ready), Some(L::Error), None, None, None],
    },
    // Index 4: Calibrating
    StateDescriptor {
        id: L::Calibrating,
        on_entry: calibrating_entry,
        on_run: calibrating_run,
        on_exit: calibrating_exit,
        allowed: [Some(L::Ready), Some(L::Error), None, None, None],
    },
    // Index 5: Error
    StateDescriptor {
        id: L::Error,
        on_entry: error_entry,
        on_run: stay,
        on_exit: no_impl,
        allowed: [Some(L::Error), None, None, None, None],
    },
];

// ═══════════════════════════════════════════════════════════════════════════
//  IDLE
// ═══════════════════════════════════════════════════════════════════════════

fn idle_entry(ctx: &mut LifecycleContext) -> Result<()> {
    ctx.display.clear();
    ctx.led.set(true);
    ctx.set_slow_period();
    Ok(())
}

fn idle_exit(ctx: &mut LifecycleContext) -> Result<()> {
    ctx.set_fast_period();
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
//  READY
// ═══════════════════════════════════════════════════════════════════════════

fn ready_entry(ctx: &mut LifecycleContext) -> Result<()> {
    ctx.display.show_glyph(Glyph::Ready, READY_BRIGHTNESS);
    let now = ctx.now_ms();
    ctx.inactivity.start(now, ctx.config.ready_inactivity_ms);
    ctx.set_slow_period();
    Ok(())
}

fn ready_run(ctx: &mut LifecycleContext) -> Result<Option<LifecycleState>> {
    let now = ctx.now_ms();
    let connected = ctx.engine.is_connected();

    if ctx.adv_window.expired(now) {
        info!("READY: advertising window closed");
        ctx.adv_window.stop();
        ctx.flags.clear_advertising();
        if let Err(e) = ctx.advertising.stop() {
            warn!("READY: stopping advertising failed: {}", e);
        }
    }

    if !connected && (ctx.flags.advertising_requested() || ctx.advertising.is_active()) {
        if !ctx.adv_window.is_running() {
            if let Err(e) = ctx.advertising.start_fast() {
                warn!("READY: advertising unavailable: {}", e);
            }
            ctx.adv_window.start(now, ctx.config.ready_advertise_window_ms);
        }
        if now.saturating_sub(ctx.last_blink_ms) >= u64::from(ctx.config.led_blink_interval_ms) {
            ctx.led.toggle();
            ctx.last_blink_ms = now;
        }
    }

    if connected {
        ctx.led.set(true);
    }

    if ctx.inactivity.expired(now) {
        info!("READY: no activity, going idle");
        return Ok(Some(L::Idle));
    }
    Ok(None)
}

fn ready_exit(ctx: &mut LifecycleContext) -> Result<()> {
    ctx.inactivity.stop();
    ctx.adv_window.stop();
    ctx.flags.clear_advertising();
    if let Err(e) = ctx.advertising.stop() {
        warn!("READY: stopping advertising failed: {}", e);
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
//  RUNNING
// ═══════════════════════════════════════════════════════════════════════════

fn running_entry(ctx: &mut LifecycleContext) -> Result<()> {
    if let Err(e) = ctx.advertising.stop() {
        warn!("RUNNING: stopping advertising failed: {}", e);
    }
    ctx.adv_window.stop();
    ctx.set_fast_period();
    Ok(())
}

fn running_run(ctx: &mut LifecycleContext) -> Result<Option<LifecycleState>> {
    let now_ticks = ctx.capture_timer.now_ticks();
    let digits = elapsed_digits(now_ticks, ctx.config.tick_duration_us);
    ctx.display.show_digits(digits, BRIGHTNESS_MAX, SECONDS_DOT);

    if let Some(last) = ctx.pulses.latest() {
        if now_ticks.wrapping_sub(last) >= ctx.config.end_of_pour_ticks() {
            info!("RUNNING: pour ended after {} pulses", ctx.pulses.len());
            return Ok(Some(L::Sending));
        }
    }
    Ok(None)
}

fn running_exit(ctx: &mut LifecycleContext) -> Result<()> {
    ctx.capture_timer.stop();
    ctx.pulses.finish();
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
//  SENDING
// ═══════════════════════════════════════════════════════════════════════════

fn sending_entry(ctx: &mut LifecycleContext) -> Result<()> {
    ctx.captured = ctx.pulses.snapshot(&mut ctx.scratch);
    if let Some(&last) = ctx.scratch[..ctx.captured].last() {
        let digits = elapsed_digits(last, ctx.config.tick_duration_us);
        ctx.display.show_digits(digits, BRIGHTNESS_MAX, SECONDS_DOT);
        info!("SENDING: {} timestamps, last at {} ticks", ctx.captured, last);
    }
    let now = ctx.now_ms();
    ctx.session.start(now, ctx.config.session_timeout_ms);
    ctx.start_sent = false;
    Ok(())
}

fn sending_run(ctx: &mut LifecycleContext) -> Result<Option<LifecycleState>> {
    if ctx.engine.is_connected() {
        if !ctx.start_sent {
            if let Err(e) = ctx.engine.prepare(&ctx.scratch[..ctx.captured]) {
                warn!("SENDING: nothing to send ({})", e);
                return Ok(Some(L::Ready));
            }
            let calibration = u16::try_from(ctx.calibration).unwrap_or(u16::MAX);
            match ctx.engine.send_start(calibration) {
                Ok(()) => ctx.start_sent = true,
                Err(e) if e.is_transient() => debug!("SENDING: START deferred ({})", e),
                Err(e) => {
                    error!("SENDING: START failed: {}", e);
                    return Err(FsmError::from(e));
                }
            }
        } else if ctx.engine.is_sending() {
            match ctx.engine.send_chunk() {
                Ok(ChunkSent::End) => return Ok(Some(L::Ready)),
                Ok(_) => {}
                Err(e) if e.is_transient() => debug!("SENDING: chunk deferred ({})", e),
                Err(e) => {
                    error!("SENDING: chunk failed: {}", e);
                    return Err(FsmError::from(e));
                }
            }
        }
    }

    if ctx.session.expired(ctx.now_ms()) {
        warn!("SENDING: session timed out");
        return Ok(Some(L::Ready));
    }
    Ok(None)
}

fn sending_exit(ctx: &mut LifecycleContext) -> Result<()> {
    ctx.engine.cancel();
    ctx.start_sent = false;
    ctx.session.stop();
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
//  CALIBRATING
// ═══════════════════════════════════════════════════════════════════════════

fn calibrating_entry(ctx: &mut LifecycleContext) -> Result<()> {
    ctx.display.show_glyph(Glyph::Calibrating, BRIGHTNESS_MID);
    ctx.reset_capture();
    ctx.set_fast_period();
    ctx.flags.set_calibration_valid(false);
    Ok(())
}

fn calibrating_run(ctx: &mut LifecycleContext) -> Result<Option<LifecycleState>> {
    let count = ctx.pulses.pulse_count();
    if count < u32::from(ctx.config.burst_min_pulses) {
        return Ok(None);
    }

    ctx.display.show_digits(count_digits(count), BRIGHTNESS_MID, None);

    let now_ticks = ctx.capture_timer.now_ticks();
    if let Some(last) = ctx.pulses.latest() {
        if now_ticks.wrapping_sub(last) >= ctx.config.end_of_pour_ticks() {
            ctx.calibration = count;
            info!("CALIBRATING: {} pulses per litre", count);
            return Ok(Some(L::Ready));
        }
    }
    Ok(None)
}

fn calibrating_exit(ctx: &mut LifecycleContext) -> Result<()> {
    ctx.capture_timer.stop();
    ctx.pulses.finish();
    if ctx.flags.calibration_valid() {
        match ctx.storage.write(CALIBRATION_ID, ctx.calibration) {
            Ok(()) => info!("NVS: calibration {} saved", ctx.calibration),
            Err(e) => warn!("NVS: saving calibration failed: {}", e),
        }
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
//  ERROR
// ═══════════════════════════════════════════════════════════════════════════

fn error_entry(ctx: &mut LifecycleContext) -> Result<()> {
    ctx.display.show_glyph(Glyph::Error, BRIGHTNESS_MID);
    Ok(())
}

// ---------------------------------------------------------------------------
// Rendering helpers
// ---------------------------------------------------------------------------

/// Capture ticks as `[10 s, 1 s, 100 ms, 10 ms]` digits.
pub fn elapsed_digits(ticks: u32, tick_us: u8) -> [u8; 4] {
    let us = u64::from(ticks) * u64::from(tick_us);
    [
        (us / 10_000_000 % 10) as u8,
        (us / 1_000_000 % 10) as u8,
        (us / 100_000 % 10) as u8,
        (us / 10_000 % 10) as u8,
    ]
}

/// Lowest four decimal digits of `n`, most significant first.
pub fn count_digits(n: u32) -> [u8; 4] {
    [
        (n / 1000 % 10) as u8,
        (n / 100 % 10) as u8,
        (n / 10 % 10) as u8,
        (n % 10) as u8,
    ]
}
