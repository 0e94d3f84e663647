//! GPIO pin assignments for the Trichter board.
//!
//! Single source of truth; every adapter references this module rather
//! than hard-coding pin numbers.

// ---------------------------------------------------------------------------
// Flow sensor
// ---------------------------------------------------------------------------

/// Hall-effect flow sensor pulse output, rising edge interrupt.
pub const FLOW_PULSE_GPIO: i32 = 4;

// ---------------------------------------------------------------------------
// Status LED
// ---------------------------------------------------------------------------

/// Single-colour status LED (active HIGH).
pub const STATUS_LED_GPIO: i32 = 2;

// ---------------------------------------------------------------------------
// User button (active-low with internal pull-up)
// ---------------------------------------------------------------------------

/// The "ready" button: single, double and long click.
pub const BUTTON_GPIO: i32 = 0;

/// Button level sampling period.
pub const BUTTON_SAMPLE_MS: u64 = 5;
