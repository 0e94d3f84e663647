//! Port traits: the hexagonal boundary between the state machines and the
//! outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ state behaviours (domain)
//! ```
//!
//! The seven-segment display, capture timer, status LED, advertiser and
//! flash storage are simple single-purpose drivers.  The lifecycle machine
//! only ever talks to them through these traits, so every behaviour can be
//! exercised on the host with recording mocks.
//!
//! The radio's data path has its own port,
//! [`IndicationTransport`](crate::transfer::IndicationTransport), next to
//! the engine that drives it.

use crate::config::DeviceConfig;
use crate::error::TransportError;

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Monotonic millisecond clock used for every software timer.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

// ───────────────────────────────────────────────────────────────
// Display port (write-only)
// ───────────────────────────────────────────────────────────────

/// Highest display brightness level.
pub const BRIGHTNESS_MAX: u8 = 7;
/// Brightness used for the live calibration count.
pub const BRIGHTNESS_MID: u8 = 5;

/// Canned messages the display can render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Glyph {
    Ready,
    Error,
    Calibrating,
}

/// Four-digit seven-segment display.
pub trait DisplayPort: Send {
    /// Render up to four decimal digits (each 0–9, most significant first).
    /// `dot` lights the decimal point after the digit at that position.
    fn show_digits(&mut self, digits: [u8; 4], brightness: u8, dot: Option<u8>);

    fn show_glyph(&mut self, glyph: Glyph, brightness: u8);

    /// Blank every segment.
    fn clear(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Status LED port
// ───────────────────────────────────────────────────────────────

pub trait StatusLedPort: Send {
    fn set(&mut self, on: bool);
    fn toggle(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Capture timer port
// ───────────────────────────────────────────────────────────────

/// Free-running timer whose counter value is latched on every pulse edge.
///
/// Shared between the pulse interrupt and the lifecycle machine, so all
/// methods take `&self`.
pub trait CaptureTimer: Send + Sync {
    /// Current counter value in ticks (wraps at `u32::MAX`).
    fn now_ticks(&self) -> u32;
    /// Clear and start counting.
    fn start(&self);
    fn stop(&self);
}

// ───────────────────────────────────────────────────────────────
// Advertiser port
// ───────────────────────────────────────────────────────────────

/// Advertising interval profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertisingMode {
    /// Short interval, quick discovery, expensive.
    Fast,
    /// Long interval, steady-state discoverability.
    Slow,
}

/// Radio advertising control, driven only by the advertising machine.
pub trait AdvertiserPort: Send {
    fn start(&mut self, mode: AdvertisingMode) -> Result<(), TransportError>;
    fn stop(&mut self) -> Result<(), TransportError>;
}

// ───────────────────────────────────────────────────────────────
// Status characteristic port
// ───────────────────────────────────────────────────────────────

/// Publishes the combined lifecycle/calibration status byte to the peer.
pub trait StatusPort: Send + Sync {
    fn publish_status(&self, status: u8);
}

// ───────────────────────────────────────────────────────────────
// Calibration storage port
// ───────────────────────────────────────────────────────────────

/// Record id of the calibration constant.
pub const CALIBRATION_ID: u16 = 1;

/// Durable storage for the calibration constant.
pub trait CalibrationPort: Send {
    fn read(&self, id: u16) -> Result<u32, StorageError>;
    fn write(&mut self, id: u16, value: u32) -> Result<(), StorageError>;
}

// ───────────────────────────────────────────────────────────────
// Configuration port
// ───────────────────────────────────────────────────────────────

/// Loads and persists [`DeviceConfig`].
///
/// Implementations MUST validate before persisting; invalid ranges are
/// rejected with [`ConfigError::ValidationFailed`], not clamped.
pub trait ConfigPort {
    /// Returns [`DeviceConfig::default()`] if nothing is stored.
    fn load(&self) -> Result<DeviceConfig, ConfigError>;

    fn save(&self, config: &DeviceConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigPort`] operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Stored config failed deserialization.
    Corrupted,
    /// A config field failed range validation.
    ValidationFailed(&'static str),
    /// Generic I/O error from the storage backend.
    IoError,
}

/// Errors from [`CalibrationPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested record does not exist.
    NotFound,
    /// The storage partition could not be mounted.
    MountFailed,
    /// Generic I/O error.
    IoError,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "not found"),
            Self::MountFailed => write!(f, "mount failed"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl std::error::Error for ConfigError {}
impl std::error::Error for StorageError {}
