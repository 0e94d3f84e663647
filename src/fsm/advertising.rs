//! Advertising policy machine.
//!
//! Second instance of the kernel, independent of the device lifecycle so a
//! peer can reconnect while a pour is being measured.
//!
//! ```text
//!            start_fast            30 s watchdog
//!   IDLE ───────────────▶ ADV_FAST ─────────────▶ ADV_SLOW
//!    ▲  ╲                  │   ▲                    │
//!    │   ╲ start_slow      │   └──── start_fast ────┤
//!    │    ╲───────────────────────────────────────▶ │
//!    │                     │ stop()                 │ stop()
//!    │                     ▼                        ▼
//!    └──────(next run)─── STOP ◀────────────────────┘
//!
//!  ERROR: radio stopped, only IDLE allowed
//! ```
//!
//! Leaving ADV_FAST or ADV_SLOW always stops the radio, so the next mode
//! restarts advertising with its own interval.

use super::timer::OneShot;
use super::{MachineContext, StateDescriptor, StateId, StateMachine, no_impl, stay};
use crate::app::ports::{AdvertiserPort, AdvertisingMode, Clock};
use crate::config::DeviceConfig;
use crate::error::{FsmError, Result};
use core::sync::atomic::{AtomicBool, Ordering};
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// State identity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AdvState {
    Idle = 0,
    Fast = 1,
    Slow = 2,
    Stop = 3,
    Error = 4,
}

impl StateId for AdvState {
    const COUNT: usize = 5;
    const ERROR: Self = Self::Error;

    fn index(self) -> usize {
        self as usize
    }

    fn from_index(idx: usize) -> Option<Self> {
        match idx {
            0 => Some(Self::Idle),
            1 => Some(Self::Fast),
            2 => Some(Self::Slow),
            3 => Some(Self::Stop),
            4 => Some(Self::Error),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Fast => "AdvFast",
            Self::Slow => "AdvSlow",
            Self::Stop => "Stop",
            Self::Error => "Error",
        }
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

pub struct AdvertisingContext {
    radio: Box<dyn AdvertiserPort>,
    clock: Arc<dyn Clock>,
    fast_timer: OneShot,
    fast_timeout_ms: u32,
    period: Duration,
    active: Arc<AtomicBool>,
}

impl MachineContext for AdvertisingContext {
    fn period(&self) -> Duration {
        self.period
    }
}

impl AdvertisingContext {
    fn start_radio(&mut self, mode: AdvertisingMode) -> Result<()> {
        self.radio.start(mode).map_err(|e| {
            warn!("ADV: start {:?} failed: {}", mode, e);
            FsmError::ApiFailure
        })?;
        self.active.store(true, Ordering::Release);
        info!("ADV: advertising ({:?})", mode);
        Ok(())
    }

    fn stop_radio(&mut self) -> Result<()> {
        if !self.active.load(Ordering::Acquire) {
            return Ok(());
        }
        self.radio.stop().map_err(|e| {
            warn!("ADV: stop failed: {}", e);
            FsmError::ApiFailure
        })?;
        self.active.store(false, Ordering::Release);
        info!("ADV: advertising stopped");
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  State table
// ═══════════════════════════════════════════════════════════════════════════

pub static ADVERTISING_TABLE: [StateDescriptor<AdvState, AdvertisingContext>; AdvState::COUNT] = [
    StateDescriptor {
        id: AdvState::Idle,
        on_entry: no_impl,
        on_run: stay,
        on_exit: no_impl,
        allowed: [
            Some(AdvState::Fast),
            Some(AdvState::Slow),
            Some(AdvState::Stop),
            None,
            None,
        ],
    },
    StateDescriptor {
        id: AdvState::Fast,
        on_entry: fast_entry,
        on_run: fast_run,
        on_exit: fast_exit,
        allowed: [
            Some(AdvState::Idle),
            Some(AdvState::Slow),
            Some(AdvState::Stop),
            None,
            None,
        ],
    },
    StateDescriptor {
        id: AdvState::Slow,
        on_entry: slow_entry,
        on_run: stay,
        on_exit: slow_exit,
        allowed: [
            Some(AdvState::Idle),
            Some(AdvState::Fast),
            Some(AdvState::Stop),
            None,
            None,
        ],
    },
    StateDescriptor {
        id: AdvState::Stop,
        on_entry: stop_entry,
        on_run: stop_run,
        on_exit: no_impl,
        allowed: [Some(AdvState::Idle), None, None, None, None],
    },
    StateDescriptor {
        id: AdvState::Error,
        on_entry: error_entry,
        on_run: stay,
        on_exit: no_impl,
        allowed: [Some(AdvState::Idle), None, None, None, None],
    },
];

// ═══════════════════════════════════════════════════════════════════════════
//  ADV_FAST
// ═══════════════════════════════════════════════════════════════════════════

fn fast_entry(ctx: &mut AdvertisingContext) -> Result<()> {
    ctx.start_radio(AdvertisingMode::Fast)?;
    let now = ctx.clock.now_ms();
    ctx.fast_timer.start(now, ctx.fast_timeout_ms);
    Ok(())
}

fn fast_run(ctx: &mut AdvertisingContext) -> Result<Option<AdvState>> {
    if ctx.fast_timer.expired(ctx.clock.now_ms()) {
        info!("ADV: fast advertising timed out, downgrading");
        return Ok(Some(AdvState::Slow));
    }
    Ok(None)
}

fn fast_exit(ctx: &mut AdvertisingContext) -> Result<()> {
    ctx.fast_timer.stop();
    ctx.stop_radio()
}

// ═══════════════════════════════════════════════════════════════════════════
//  ADV_SLOW
// ═══════════════════════════════════════════════════════════════════════════

fn slow_entry(ctx: &mut AdvertisingContext) -> Result<()> {
    ctx.start_radio(AdvertisingMode::Slow)
}

fn slow_exit(ctx: &mut AdvertisingContext) -> Result<()> {
    ctx.stop_radio()
}

// ═══════════════════════════════════════════════════════════════════════════
//  STOP / ERROR
// ═══════════════════════════════════════════════════════════════════════════

fn stop_entry(ctx: &mut AdvertisingContext) -> Result<()> {
    ctx.stop_radio()
}

fn stop_run(_ctx: &mut AdvertisingContext) -> Result<Option<AdvState>> {
    Ok(Some(AdvState::Idle))
}

fn error_entry(ctx: &mut AdvertisingContext) -> Result<()> {
    if let Err(e) = ctx.stop_radio() {
        warn!("ADV: radio left running in error state ({})", e);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

pub type AdvertisingMachine = StateMachine<AdvState, AdvertisingContext>;

/// Cloneable control surface of the advertising machine.
#[derive(Clone)]
pub struct Advertising {
    machine: Arc<AdvertisingMachine>,
    active: Arc<AtomicBool>,
}

impl Advertising {
    pub fn new(
        radio: Box<dyn AdvertiserPort>,
        clock: Arc<dyn Clock>,
        config: &DeviceConfig,
    ) -> Result<Self> {
        let active = Arc::new(AtomicBool::new(false));
        let ctx = AdvertisingContext {
            radio,
            clock,
            fast_timer: OneShot::new(),
            fast_timeout_ms: config.fast_advertising_timeout_ms,
            period: Duration::from_millis(u64::from(config.advertising_period_ms)),
            active: Arc::clone(&active),
        };
        let machine = StateMachine::new("adv", &ADVERTISING_TABLE, AdvState::Idle, ctx)?;
        Ok(Self {
            machine: Arc::new(machine),
            active,
        })
    }

    pub fn machine(&self) -> &Arc<AdvertisingMachine> {
        &self.machine
    }

    /// Ask for fast advertising on the machine's next cycle.
    pub fn start_fast(&self) -> Result<()> {
        self.machine.transition_deferred(AdvState::Fast)
    }

    /// Ask for slow advertising on the machine's next cycle.
    pub fn start_slow(&self) -> Result<()> {
        self.machine.transition_deferred(AdvState::Slow)
    }

    /// Stop advertising now.  Also discards a pending start request.
    pub fn stop(&self) -> Result<()> {
        self.machine.cancel_deferred();
        match self.machine.request(AdvState::Stop) {
            Err(FsmError::TransitionForbidden) => Ok(()),
            other => other,
        }
    }

    /// Whether the radio is currently advertising.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn state(&self) -> AdvState {
        self.machine.current_state()
    }
}
