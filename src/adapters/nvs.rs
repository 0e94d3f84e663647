//! NVS (Non-Volatile Storage) adapter.
//!
//! Implements both [`ConfigPort`] and [`CalibrationPort`].
//!
//! - Calibration constants are plain `u32` entries keyed `cal<id>`.
//! - The device configuration is one postcard blob, range-checked before
//!   every save.
//!
//! ESP-IDF NVS commits are atomic per `nvs_commit()`, so a power cut
//! mid-write leaves the previous value intact.

use crate::app::ports::{CalibrationPort, ConfigError, ConfigPort, StorageError};
use crate::config::DeviceConfig;
use log::info;
#[cfg(target_os = "espidf")]
use log::warn;

#[cfg(not(target_os = "espidf"))]
use std::collections::HashMap;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

#[cfg(target_os = "espidf")]
const NAMESPACE: &[u8] = b"trichter\0";
#[cfg(target_os = "espidf")]
const CONFIG_KEY: &[u8] = b"devcfg\0";

#[cfg(target_os = "espidf")]
const MAX_BLOB_SIZE: usize = 256;

/// NUL-terminated NVS key for calibration record `id`.
fn calibration_key(id: u16) -> heapless::String<12> {
    let mut key = heapless::String::new();
    // "cal" + at most five digits + NUL fits in 12 bytes.
    let _ = core::fmt::write(&mut key, format_args!("cal{}\0", id));
    key
}

pub struct NvsStore {
    #[cfg(not(target_os = "espidf"))]
    config: std::cell::RefCell<Option<Vec<u8>>>,
    #[cfg(not(target_os = "espidf"))]
    values: HashMap<u16, u32>,
}

impl NvsStore {
    /// Initialise NVS flash.  On first boot or after a version mismatch the
    /// partition is erased and re-initialised.
    pub fn new() -> Result<Self, StorageError> {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: called once from the main task before any other NVS use.
            let ret = unsafe { nvs_flash_init() };
            if ret == ESP_ERR_NVS_NO_FREE_PAGES || ret == ESP_ERR_NVS_NEW_VERSION_FOUND {
                warn!("NVS: erasing and re-initialising flash partition");
                if unsafe { nvs_flash_erase() } != ESP_OK {
                    return Err(StorageError::MountFailed);
                }
                if unsafe { nvs_flash_init() } != ESP_OK {
                    return Err(StorageError::MountFailed);
                }
            } else if ret != ESP_OK {
                return Err(StorageError::MountFailed);
            }
            info!("NVS: flash initialised");
        }

        #[cfg(not(target_os = "espidf"))]
        info!("NVS: simulation backend");

        Ok(Self {
            #[cfg(not(target_os = "espidf"))]
            config: std::cell::RefCell::new(None),
            #[cfg(not(target_os = "espidf"))]
            values: HashMap::new(),
        })
    }

    /// Open the namespace, run `f` with the handle, close.
    #[cfg(target_os = "espidf")]
    fn with_handle<F, T>(write: bool, f: F) -> Result<T, i32>
    where
        F: FnOnce(nvs_handle_t) -> Result<T, i32>,
    {
        let mut handle: nvs_handle_t = 0;
        let mode = if write {
            nvs_open_mode_t_NVS_READWRITE
        } else {
            nvs_open_mode_t_NVS_READONLY
        };
        let ret = unsafe { nvs_open(NAMESPACE.as_ptr() as *const _, mode, &mut handle) };
        if ret != ESP_OK {
            return Err(ret);
        }
        let result = f(handle);
        unsafe { nvs_close(handle) };
        result
    }
}

/// Longest accepted end-of-pour gap.  Keeps the gap far inside the
/// capture counter's wrap.
pub const MAX_END_OF_POUR_GAP_MS: u32 = 60_000;

/// Reject configurations the device cannot run with.
pub fn validate_config(cfg: &DeviceConfig) -> Result<(), ConfigError> {
    if cfg.fast_period_ms == 0 || cfg.slow_period_ms == 0 || cfg.advertising_period_ms == 0 {
        return Err(ConfigError::ValidationFailed("driver periods must be > 0"));
    }
    if cfg.fast_period_ms > cfg.slow_period_ms {
        return Err(ConfigError::ValidationFailed(
            "fast_period_ms must be <= slow_period_ms",
        ));
    }
    if !(10_000..=30_000).contains(&cfg.session_timeout_ms) {
        return Err(ConfigError::ValidationFailed(
            "session_timeout_ms must be 10000–30000",
        ));
    }
    if cfg.burst_window_ms == 0 || cfg.burst_window_ms >= cfg.end_of_pour_gap_ms {
        return Err(ConfigError::ValidationFailed(
            "burst_window_ms must be > 0 and < end_of_pour_gap_ms",
        ));
    }
    if cfg.end_of_pour_gap_ms > MAX_END_OF_POUR_GAP_MS {
        return Err(ConfigError::ValidationFailed(
            "end_of_pour_gap_ms must be <= 60000",
        ));
    }
    if cfg.burst_min_pulses == 0 {
        return Err(ConfigError::ValidationFailed("burst_min_pulses must be > 0"));
    }
    if cfg.tick_duration_us == 0 {
        return Err(ConfigError::ValidationFailed("tick_duration_us must be > 0"));
    }
    if cfg.led_blink_interval_ms == 0 {
        return Err(ConfigError::ValidationFailed(
            "led_blink_interval_ms must be > 0",
        ));
    }
    if !(100..=30_000).contains(&cfg.ack_timeout_ms) {
        return Err(ConfigError::ValidationFailed(
            "ack_timeout_ms must be 100–30000",
        ));
    }
    if cfg.device_name.is_empty() {
        return Err(ConfigError::ValidationFailed("device_name must not be empty"));
    }
    Ok(())
}

// ── ConfigPort ───────────────────────────────────────────────

impl ConfigPort for NvsStore {
    fn load(&self) -> Result<DeviceConfig, ConfigError> {
        #[cfg(not(target_os = "espidf"))]
        let stored = self.config.borrow().clone();

        #[cfg(target_os = "espidf")]
        let stored = {
            let result = Self::with_handle(false, |handle| {
                let mut size: usize = 0;
                let ret = unsafe {
                    nvs_get_blob(
                        handle,
                        CONFIG_KEY.as_ptr() as *const _,
                        core::ptr::null_mut(),
                        &mut size,
                    )
                };
                if ret != ESP_OK || size == 0 || size > MAX_BLOB_SIZE {
                    return Err(ret);
                }
                let mut buf = vec![0u8; size];
                let ret = unsafe {
                    nvs_get_blob(
                        handle,
                        CONFIG_KEY.as_ptr() as *const _,
                        buf.as_mut_ptr() as *mut _,
                        &mut size,
                    )
                };
                if ret != ESP_OK {
                    return Err(ret);
                }
                Ok(buf)
            });
            match result {
                Ok(bytes) => Some(bytes),
                Err(e) if e == ESP_ERR_NVS_NOT_FOUND => None,
                Err(e) => {
                    warn!("NVS: config read error {}", e);
                    return Err(ConfigError::IoError);
                }
            }
        };

        match stored {
            Some(bytes) => {
                let cfg: DeviceConfig =
                    postcard::from_bytes(&bytes).map_err(|_| ConfigError::Corrupted)?;
                validate_config(&cfg)?;
                info!("NVS: loaded config ({} bytes)", bytes.len());
                Ok(cfg)
            }
            None => {
                info!("NVS: no stored config, using defaults");
                Ok(DeviceConfig::default())
            }
        }
    }

    fn save(&self, config: &DeviceConfig) -> Result<(), ConfigError> {
        validate_config(config)?;
        let bytes = postcard::to_allocvec(config).map_err(|_| ConfigError::IoError)?;

        #[cfg(not(target_os = "espidf"))]
        {
            *self.config.borrow_mut() = Some(bytes);
            info!("NVS: config saved (simulation)");
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let result = Self::with_handle(true, |handle| {
                let ret = unsafe {
                    nvs_set_blob(
                        handle,
                        CONFIG_KEY.as_ptr() as *const _,
                        bytes.as_ptr() as *const _,
                        bytes.len(),
                    )
                };
                if ret != ESP_OK {
                    return Err(ret);
                }
                match unsafe { nvs_commit(handle) } {
                    r if r == ESP_OK => Ok(()),
                    r => Err(r),
                }
            });
            result.map_err(|e| {
                warn!("NVS: config write error {}", e);
                ConfigError::IoError
            })?;
            info!("NVS: config saved ({} bytes)", bytes.len());
            Ok(())
        }
    }
}

// ── CalibrationPort ──────────────────────────────────────────

impl CalibrationPort for NvsStore {
    fn read(&self, id: u16) -> Result<u32, StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            self.values.get(&id).copied().ok_or(StorageError::NotFound)
        }

        #[cfg(target_os = "espidf")]
        {
            let key = calibration_key(id);
            let result = Self::with_handle(false, |handle| {
                let mut value: u32 = 0;
                let ret = unsafe { nvs_get_u32(handle, key.as_ptr() as *const _, &mut value) };
                if ret != ESP_OK {
                    return Err(ret);
                }
                Ok(value)
            });
            match result {
                Ok(value) => Ok(value),
                Err(e) if e == ESP_ERR_NVS_NOT_FOUND => Err(StorageError::NotFound),
                Err(_) => Err(StorageError::IoError),
            }
        }
    }

    fn write(&mut self, id: u16, value: u32) -> Result<(), StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            self.values.insert(id, value);
        }

        #[cfg(target_os = "espidf")]
        {
            let key = calibration_key(id);
            Self::with_handle(true, |handle| {
                let ret = unsafe { nvs_set_u32(handle, key.as_ptr() as *const _, value) };
                if ret != ESP_OK {
                    return Err(ret);
                }
                match unsafe { nvs_commit(handle) } {
                    r if r == ESP_OK => Ok(()),
                    r => Err(r),
                }
            })
            .map_err(|_| StorageError::IoError)?;
        }

        info!("NVS: {} = {}", calibration_key(id).trim_end_matches('\0'), value);
        Ok(())
    }
}
