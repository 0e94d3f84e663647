//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter    | Implements           | Connects to                 |
//! |------------|----------------------|-----------------------------|
//! | `ble`      | IndicationTransport  | Bluedroid GATT server       |
//! |            | AdvertiserPort       | GAP advertising             |
//! |            | StatusPort           | Status characteristic       |
//! | `button`   | (click classifier)   | Button GPIO level samples   |
//! | `display`  | DisplayPort          | Serial log                  |
//! | `hardware` | StatusLedPort        | embedded-hal output pin     |
//! |            | CaptureTimer         | ESP32 high-resolution timer |
//! | `nvs`      | ConfigPort           | NVS / in-memory store       |
//! |            | CalibrationPort      |                             |
//! | `time`     | Clock                | ESP32 system timer          |

pub mod ble;
pub mod button;
pub mod display;
pub mod hardware;
pub mod nvs;
pub mod time;
