//! Hardware adapters: status LED and pulse capture timer.
//!
//! The LED is any `embedded-hal` output pin, so the same adapter drives an
//! `esp-idf-hal` `PinDriver` on target and a mock pin in tests.
//!
//! The capture timer counts 8 µs ticks off the high-resolution system
//! timer.  Starting it re-zeroes the count; stopping freezes it.
//!
//! ```text
//!   counter = (now_us - origin_us) / tick_us      while running
//!   counter = frozen value                          while stopped
//! ```
//!
//! Microseconds are kept as wrapping `u32` (no 64-bit atomics on the
//! target); a single pour never spans the 71-minute wrap.

use crate::app::ports::{CaptureTimer, StatusLedPort};
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use embedded_hal::digital::StatefulOutputPin;
use log::warn;

// ───────────────────────────────────────────────────────────────
// Status LED
// ───────────────────────────────────────────────────────────────

pub struct GpioLed<P> {
    pin: P,
}

impl<P: StatefulOutputPin> GpioLed<P> {
    pub fn new(pin: P) -> Self {
        Self { pin }
    }

    pub fn into_inner(self) -> P {
        self.pin
    }
}

impl<P: StatefulOutputPin + Send> StatusLedPort for GpioLed<P> {
    fn set(&mut self, on: bool) {
        let result = if on {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };
        if result.is_err() {
            warn!("LED: pin write failed");
        }
    }

    fn toggle(&mut self) {
        if self.pin.toggle().is_err() {
            warn!("LED: pin toggle failed");
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Capture timer
// ───────────────────────────────────────────────────────────────

/// Free-running tick counter shared by the pulse ISR and the lifecycle
/// machine.  Lock-free: every field is an atomic.
pub struct SystemCaptureTimer {
    tick_us: u32,
    origin_us: AtomicU32,
    frozen: AtomicU32,
    running: AtomicBool,
    #[cfg(not(target_os = "espidf"))]
    epoch: std::time::Instant,
}

impl SystemCaptureTimer {
    pub fn new(tick_us: u8) -> Self {
        Self {
            tick_us: u32::from(tick_us.max(1)),
            origin_us: AtomicU32::new(0),
            frozen: AtomicU32::new(0),
            running: AtomicBool::new(false),
            #[cfg(not(target_os = "espidf"))]
            epoch: std::time::Instant::now(),
        }
    }

    #[cfg(target_os = "espidf")]
    fn now_us(&self) -> u32 {
        (unsafe { esp_idf_svc::sys::esp_timer_get_time() }) as u32
    }

    #[cfg(not(target_os = "espidf"))]
    fn now_us(&self) -> u32 {
        self.epoch.elapsed().as_micros() as u32
    }

    fn ticks_since_origin(&self) -> u32 {
        let elapsed = self
            .now_us()
            .wrapping_sub(self.origin_us.load(Ordering::Acquire));
        elapsed / self.tick_us
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl CaptureTimer for SystemCaptureTimer {
    fn now_ticks(&self) -> u32 {
        if self.is_running() {
            self.ticks_since_origin()
        } else {
            self.frozen.load(Ordering::Acquire)
        }
    }

    fn start(&self) {
        self.origin_us.store(self.now_us(), Ordering::Release);
        self.frozen.store(0, Ordering::Release);
        self.running.store(true, Ordering::Release);
    }

    fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            self.frozen.store(self.ticks_since_origin(), Ordering::Release);
        }
    }
}

// ───────────────────────────────────────────────────────────────
// GPIO inputs
// ───────────────────────────────────────────────────────────────

/// GPIO driver call failed with the given ESP-IDF code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpioError(pub i32);

impl core::fmt::Display for GpioError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "GPIO driver error {}", self.0)
    }
}

impl std::error::Error for GpioError {}

#[cfg(target_os = "espidf")]
static PULSE_ROUTER: std::sync::OnceLock<std::sync::Arc<crate::app::inputs::InputRouter>> =
    std::sync::OnceLock::new();

#[cfg(target_os = "espidf")]
unsafe extern "C" fn flow_pulse_isr(_arg: *mut core::ffi::c_void) {
    if let Some(router) = PULSE_ROUTER.get() {
        router.on_pulse_edge();
    }
}

/// Configure the flow sensor and button inputs and route pulse edges to
/// `router`.  Call once at boot, after the device is built.
#[cfg(target_os = "espidf")]
pub fn init_inputs(router: std::sync::Arc<crate::app::inputs::InputRouter>) -> Result<(), GpioError> {
    use crate::pins;
    use esp_idf_svc::sys::*;

    if PULSE_ROUTER.set(router).is_err() {
        warn!("GPIO: inputs already initialised");
        return Ok(());
    }

    let check = |ret: i32| if ret == ESP_OK as i32 { Ok(()) } else { Err(GpioError(ret)) };

    // SAFETY: called once from the main task before the ISR is enabled.
    // The ISR only touches atomics behind the installed router.
    unsafe {
        check(gpio_config(&gpio_config_t {
            pin_bit_mask: 1u64 << pins::FLOW_PULSE_GPIO,
            mode: gpio_mode_t_GPIO_MODE_INPUT,
            pull_up_en: gpio_pullup_t_GPIO_PULLUP_DISABLE,
            pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_ENABLE,
            intr_type: gpio_int_type_t_GPIO_INTR_POSEDGE,
        }))?;
        check(gpio_config(&gpio_config_t {
            pin_bit_mask: 1u64 << pins::BUTTON_GPIO,
            mode: gpio_mode_t_GPIO_MODE_INPUT,
            pull_up_en: gpio_pullup_t_GPIO_PULLUP_ENABLE,
            pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
            intr_type: gpio_int_type_t_GPIO_INTR_DISABLE,
        }))?;

        let ret = gpio_install_isr_service(0);
        if ret != ESP_OK as i32 && ret != ESP_ERR_INVALID_STATE as i32 {
            return Err(GpioError(ret));
        }
        check(gpio_isr_handler_add(
            pins::FLOW_PULSE_GPIO,
            Some(flow_pulse_isr),
            core::ptr::null_mut(),
        ))?;
        check(gpio_intr_enable(pins::FLOW_PULSE_GPIO))?;
    }
    log::info!("GPIO: flow pulse ISR installed on GPIO{}", crate::pins::FLOW_PULSE_GPIO);
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
pub fn init_inputs(_router: std::sync::Arc<crate::app::inputs::InputRouter>) -> Result<(), GpioError> {
    log::info!("GPIO(sim): input interrupts skipped");
    Ok(())
}

/// Current level of the (active-low) button.
#[cfg(target_os = "espidf")]
pub fn button_pressed() -> bool {
    // SAFETY: register read on a configured input.
    (unsafe { esp_idf_svc::sys::gpio_get_level(crate::pins::BUTTON_GPIO) }) == 0
}

#[cfg(not(target_os = "espidf"))]
pub fn button_pressed() -> bool {
    false
}
