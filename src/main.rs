//! Trichter Firmware: Main Entry Point
//!
//! Hexagonal architecture: two table-driven state machines behind port
//! traits, with the adapters wired in here.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  GpioLed      LogDisplay     NvsStore        SystemClock       │
//! │  (LED)        (Display)      (Config+Cal)    (Clock)           │
//! │  SystemCaptureTimer          BleRadio                          │
//! │  (CaptureTimer)              (Indications+Advertiser+Status)   │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │              Device (pure logic)                       │    │
//! │  │  lifecycle FSM · advertising FSM · TransferEngine      │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  threads: fsm-main · fsm-adv · xfer-retry · burst-window ·     │
//! │           buttons                                              │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use anyhow::{Context, Result};
use esp_idf_hal::gpio::PinDriver;
use esp_idf_hal::peripherals::Peripherals;
use log::{error, info, warn};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use trichter::adapters::ble::{self, BleRadio};
use trichter::adapters::button::ButtonClassifier;
use trichter::adapters::display::LogDisplay;
use trichter::adapters::hardware::{self, GpioLed, SystemCaptureTimer};
use trichter::adapters::nvs::NvsStore;
use trichter::adapters::time::SystemClock;
use trichter::app::inputs::InputRouter;
use trichter::app::ports::Clock;
use trichter::app::service::{self, Device, DeviceParts};
use trichter::pins;

const BUTTON_SAMPLE: Duration = Duration::from_millis(pins::BUTTON_SAMPLE_MS);
const BUTTON_STACK_KB: usize = 3;

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  Trichter v{}                     ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    let peripherals = Peripherals::take().context("peripherals already taken")?;

    // ── 2. Load config from NVS (or defaults) ─────────────────
    let nvs = NvsStore::new().context("NVS init failed")?;
    let config = service::load_config(&nvs);

    // ── 3. Construct adapters ─────────────────────────────────
    let radio = BleRadio::new(config.device_name.clone());
    radio
        .init(config.tick_duration_us)
        .context("BLE stack init failed")?;

    let clock = Arc::new(SystemClock::new());
    let capture_timer = Arc::new(SystemCaptureTimer::new(config.tick_duration_us));
    // GPIO2 is pins::STATUS_LED_GPIO.
    info!("Status LED on GPIO{}", pins::STATUS_LED_GPIO);
    let led = GpioLed::new(PinDriver::output(peripherals.pins.gpio2)?);

    let parts = DeviceParts {
        display: Box::new(LogDisplay::new()),
        led: Box::new(led),
        calibration: Box::new(nvs),
        clock: clock.clone(),
        capture_timer,
        advertiser: Box::new(radio.clone()),
        transport: Box::new(radio.clone()),
        status: Arc::new(radio),
    };

    // ── 4. Build and start the device ─────────────────────────
    let device = Device::new(config, parts).context("device construction failed")?;
    ble::install_link(Arc::clone(device.link()));
    hardware::init_inputs(Arc::clone(device.inputs())).context("GPIO init failed")?;

    device.start().context("device start failed")?;
    let threads = device.spawn().context("thread spawn failed")?;
    let _buttons = spawn_buttons(Arc::clone(device.inputs()), clock)?;

    info!("System ready.");

    // ── 5. Supervise ──────────────────────────────────────────
    // The driver threads only return when their machine halts in ERROR.
    match threads.lifecycle.join() {
        Ok(e) => error!("Lifecycle machine halted: {}", e),
        Err(_) => error!("Lifecycle driver panicked"),
    }
    match threads.advertising.join() {
        Ok(e) => warn!("Advertising machine halted: {}", e),
        Err(_) => error!("Advertising driver panicked"),
    }
    Ok(())
}

/// Sample the button and feed classified clicks to the router.
fn spawn_buttons(router: Arc<InputRouter>, clock: Arc<SystemClock>) -> Result<thread::JoinHandle<()>> {
    info!("Spawning 'buttons' (stack={}KB)", BUTTON_STACK_KB);
    let handle = thread::Builder::new()
        .name("buttons".into())
        .stack_size(BUTTON_STACK_KB * 1024)
        .spawn(move || {
            let mut classifier = ButtonClassifier::new();
            loop {
                if let Some(click) = classifier.update(hardware::button_pressed(), clock.now_ms()) {
                    info!("INPUT: {:?} click", click);
                    router.on_click(click);
                }
                thread::sleep(BUTTON_SAMPLE);
            }
        })?;
    Ok(handle)
}
