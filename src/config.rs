//! Device configuration parameters
//!
//! All tunable timings for the Trichter device.
//! Values can be overridden via a postcard record in NVS.

use serde::{Deserialize, Serialize};

/// Core device configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    // --- Lifecycle machine ---
    /// Driver period while measuring, sending or calibrating (ms)
    pub fast_period_ms: u32,
    /// Driver period while idle or armed (ms)
    pub slow_period_ms: u32,
    /// READY falls back to IDLE after this long without a pour (ms)
    pub ready_inactivity_ms: u32,
    /// READY stops advertising after this long (ms)
    pub ready_advertise_window_ms: u32,
    /// LED blink half-period while advertising (ms)
    pub led_blink_interval_ms: u32,
    /// Upper bound on a SENDING session (ms)
    pub session_timeout_ms: u32,

    // --- Pulse capture ---
    /// Gap after the last pulse that ends a pour (ms)
    pub end_of_pour_gap_ms: u32,
    /// Window after the first pulse in which a burst must qualify (ms)
    pub burst_window_ms: u32,
    /// Pulses required inside the window for a real pour
    pub burst_min_pulses: u16,
    /// Capture timer tick duration (µs), also exposed to the peer
    pub tick_duration_us: u8,

    // --- Wireless ---
    /// Advertising machine period (ms)
    pub advertising_period_ms: u32,
    /// Fast advertising downgrades to slow after this long (ms)
    pub fast_advertising_timeout_ms: u32,
    /// Maximum wait for a chunk acknowledgment (ms)
    pub ack_timeout_ms: u32,
    /// Advertised device name
    pub device_name: heapless::String<24>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        let mut device_name = heapless::String::new();
        // "Trichter" always fits in 24 bytes.
        let _ = device_name.push_str("Trichter");
        Self {
            fast_period_ms: 9,
            slow_period_ms: 300,
            ready_inactivity_ms: 120_000,
            ready_advertise_window_ms: 120_000,
            led_blink_interval_ms: 1_500,
            session_timeout_ms: 30_000,

            end_of_pour_gap_ms: 1_000,
            burst_window_ms: 150,
            burst_min_pulses: 3,
            tick_duration_us: 8,

            advertising_period_ms: 500,
            fast_advertising_timeout_ms: 30_000,
            ack_timeout_ms: 5_000,
            device_name,
        }
    }
}

impl DeviceConfig {
    /// End-of-pour gap expressed in capture timer ticks, saturating.
    pub fn end_of_pour_ticks(&self) -> u32 {
        let ticks =
            u64::from(self.end_of_pour_gap_ms) * 1_000 / u64::from(self.tick_duration_us.max(1));
        u32::try_from(ticks).unwrap_or(u32::MAX)
    }
}
