//! Device service: the wiring of both machines, the transfer engine and
//! their worker threads.
//!
//! [`Device`] owns nothing hardware-specific.  Adapters are handed in as
//! port objects through [`DeviceParts`], so the complete device runs on the
//! host against mocks.
//!
//! ```text
//!                  ┌──────────────────────────────────────────┐
//!  pulse ISR ────▶ │ InputRouter ──deferred──▶ lifecycle FSM  │ ──▶ display / LED / NVS
//!  buttons  ─────▶ │      │                        │  ▲       │
//!                  │      │                        ▼  │       │
//!  GATT cbs ─────▶ │ LinkHub ──▶ TransferEngine ◀──┘  │       │ ──▶ indications
//!                  │      └────▶ advertising FSM ─────┘       │ ──▶ GAP advertising
//!                  └──────────────────────────────────────────┘
//!   threads: fsm-main · fsm-adv · xfer-retry · burst-window
//! ```

use log::{info, warn};
use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::DeviceConfig;
use crate::error::{FsmError, Result};
use crate::fsm::advertising::Advertising;
use crate::fsm::context::{LifecycleContext, LifecyclePorts, SharedFlags};
use crate::fsm::driver::{self, DriverConfig};
use crate::fsm::states::{LIFECYCLE_TABLE, LifecycleMachine, LifecycleState};
use crate::fsm::StateMachine;
use crate::sensors::pulse::PulseCapture;
use crate::transfer::{self, IndicationTransport, TransferEngine};

use super::events::DeviceStatus;
use super::inputs::{self, InputRouter};
use super::link::LinkHub;
use super::ports::{
    AdvertiserPort, CalibrationPort, CaptureTimer, Clock, ConfigPort, DisplayPort, StatusLedPort,
    StatusPort,
};

// ───────────────────────────────────────────────────────────────
// Thread layout
// ───────────────────────────────────────────────────────────────

const LIFECYCLE_THREAD: DriverConfig = DriverConfig {
    name: "fsm-main\0",
    priority: 5,
    stack_kb: 8,
};

const ADVERTISING_THREAD: DriverConfig = DriverConfig {
    name: "fsm-adv\0",
    priority: 4,
    stack_kb: 4,
};

const RETRY_STACK_KB: usize = 4;
const BURST_STACK_KB: usize = 3;

// ───────────────────────────────────────────────────────────────
// Parts
// ───────────────────────────────────────────────────────────────

/// Every adapter the device needs.
pub struct DeviceParts {
    pub display: Box<dyn DisplayPort>,
    pub led: Box<dyn StatusLedPort>,
    pub calibration: Box<dyn CalibrationPort>,
    pub clock: Arc<dyn Clock>,
    pub capture_timer: Arc<dyn CaptureTimer>,
    pub advertiser: Box<dyn AdvertiserPort>,
    pub transport: Box<dyn IndicationTransport>,
    pub status: Arc<dyn StatusPort>,
}

/// Join handles of the running device.
pub struct DeviceThreads {
    pub lifecycle: JoinHandle<FsmError>,
    pub advertising: JoinHandle<FsmError>,
    pub retry: JoinHandle<()>,
    pub burst_window: JoinHandle<()>,
}

// ───────────────────────────────────────────────────────────────
// Device
// ───────────────────────────────────────────────────────────────

pub struct Device {
    lifecycle: Arc<LifecycleMachine>,
    advertising: Advertising,
    engine: Arc<TransferEngine>,
    pulses: Arc<PulseCapture>,
    flags: Arc<SharedFlags>,
    router: Arc<InputRouter>,
    link: Arc<LinkHub>,
}

impl Device {
    /// Build both machines and the engine.  Nothing runs until
    /// [`start`](Self::start).
    pub fn new(config: DeviceConfig, parts: DeviceParts) -> Result<Self> {
        let flags = Arc::new(SharedFlags::new());
        let pulses = Arc::new(PulseCapture::new());
        let engine = Arc::new(TransferEngine::new(
            parts.transport,
            Duration::from_millis(u64::from(config.ack_timeout_ms)),
        ));
        let advertising = Advertising::new(parts.advertiser, Arc::clone(&parts.clock), &config)?;

        let ctx = LifecycleContext::new(
            config.clone(),
            LifecyclePorts {
                display: parts.display,
                led: parts.led,
                calibration: parts.calibration,
                clock: parts.clock,
                capture_timer: Arc::clone(&parts.capture_timer),
            },
            Arc::clone(&pulses),
            Arc::clone(&engine),
            advertising.clone(),
            Arc::clone(&flags),
        );

        let lifecycle = Arc::new(
            StateMachine::new("lifecycle", &LIFECYCLE_TABLE, LifecycleState::Idle, ctx)?
                .with_notifier(status_reporter(parts.status, Arc::clone(&flags))),
        );

        let router = Arc::new(InputRouter::new(
            Arc::clone(&lifecycle),
            Arc::clone(&pulses),
            parts.capture_timer,
            Arc::clone(&engine),
            Arc::clone(&flags),
            Duration::from_millis(u64::from(config.burst_window_ms)),
            config.burst_min_pulses,
        ));
        let link = Arc::new(LinkHub::new(
            Arc::clone(&engine),
            advertising.clone(),
            Arc::clone(&router),
        ));

        Ok(Self {
            lifecycle,
            advertising,
            engine,
            pulses,
            flags,
            router,
            link,
        })
    }

    /// Enter both initial states and queue the boot sequence.
    pub fn start(&self) -> Result<()> {
        self.advertising.machine().start()?;
        self.lifecycle.start()?;
        self.router.on_startup()?;
        info!("Device started");
        Ok(())
    }

    /// Spawn the driver threads, the retry worker and the burst window.
    pub fn spawn(&self) -> io::Result<DeviceThreads> {
        let lifecycle = driver::spawn(Arc::clone(&self.lifecycle), LIFECYCLE_THREAD)?;
        let advertising = driver::spawn(Arc::clone(self.advertising.machine()), ADVERTISING_THREAD)?;
        let retry = transfer::retry::spawn_worker(Arc::clone(&self.engine), RETRY_STACK_KB)?;
        let burst_window = inputs::spawn_burst_window(Arc::clone(&self.router), BURST_STACK_KB)?;
        Ok(DeviceThreads {
            lifecycle,
            advertising,
            retry,
            burst_window,
        })
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn lifecycle(&self) -> &Arc<LifecycleMachine> {
        &self.lifecycle
    }

    pub fn advertising(&self) -> &Advertising {
        &self.advertising
    }

    pub fn engine(&self) -> &Arc<TransferEngine> {
        &self.engine
    }

    pub fn pulses(&self) -> &Arc<PulseCapture> {
        &self.pulses
    }

    pub fn flags(&self) -> &Arc<SharedFlags> {
        &self.flags
    }

    pub fn inputs(&self) -> &Arc<InputRouter> {
        &self.router
    }

    pub fn link(&self) -> &Arc<LinkHub> {
        &self.link
    }

    /// Status byte as the peer would read it now.
    pub fn status(&self) -> DeviceStatus {
        DeviceStatus {
            state: self.lifecycle.current_state(),
            calibration_valid: self.flags.calibration_valid(),
        }
    }
}

/// Notifier mirroring every lifecycle entry to the status characteristic.
fn status_reporter(
    status: Arc<dyn StatusPort>,
    flags: Arc<SharedFlags>,
) -> impl Fn(LifecycleState) + Send + Sync + 'static {
    move |state| {
        let byte = DeviceStatus {
            state,
            calibration_valid: flags.calibration_valid(),
        }
        .encode();
        status.publish_status(byte);
    }
}

// ───────────────────────────────────────────────────────────────
// Configuration
// ───────────────────────────────────────────────────────────────

/// Load the stored configuration, falling back to defaults on any error.
pub fn load_config(storage: &impl ConfigPort) -> DeviceConfig {
    match storage.load() {
        Ok(config) => config,
        Err(e) => {
            warn!("Config load failed ({}), using defaults", e);
            DeviceConfig::default()
        }
    }
}
