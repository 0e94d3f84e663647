//! BLE adapter.
//!
//! Implements [`IndicationTransport`], [`AdvertiserPort`] and
//! [`StatusPort`] on one radio handle and forwards every stack event to
//! the [`LinkHub`].
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: Bluedroid GATT server via the raw
//!   `esp_idf_svc::sys` bindings.
//! - **all other targets**: logging simulation for host runs.
//!
//! ## GATT Service Layout
//!
//! | Characteristic | UUID                                     | Props               |
//! |----------------|------------------------------------------|---------------------|
//! | Pour data      | `f9d76937-bd70-4e4f-a4da-0b718d5f5b6d`   | Indicate            |
//! | Tick duration  | `23de2cad-0fc8-49f4-bbcc-5eb2c9fdb91b`   | Read+Notify         |
//! | Device status  | `5c7cd5f2-0a4e-4bde-9e4e-6d1f4f0a43b1`   | Read+Write+Notify   |
//!
//! Service: `af56d6dd-3c39-4d67-9bbe-4fb04fa327cc`.

use crate::app::link::LinkHub;
use crate::app::ports::{AdvertiserPort, AdvertisingMode, StatusPort};
use crate::error::TransportError;
use crate::transfer::{ConnHandle, IndicationTransport};
use log::{info, warn};
use std::sync::{Arc, OnceLock};

// ───────────────────────────────────────────────────────────────
// Constants
// ───────────────────────────────────────────────────────────────

pub const SERVICE_UUID: u128 = 0xaf56d6dd_3c39_4d67_9bbe_4fb04fa327cc;
pub const CHAR_POUR_DATA: u128 = 0xf9d76937_bd70_4e4f_a4da_0b718d5f5b6d;
pub const CHAR_TICK_DURATION: u128 = 0x23de2cad_0fc8_49f4_bbcc_5eb2c9fdb91b;
pub const CHAR_STATUS: u128 = 0x5c7cd5f2_0a4e_4bde_9e4e_6d1f4f0a43b1;

/// Fast advertising interval bounds (0.625 ms units): 30–60 ms.
pub const ADV_FAST_INTERVAL: (u16, u16) = (0x30, 0x60);
/// Slow advertising interval bounds: ~852 ms.
pub const ADV_SLOW_INTERVAL: (u16, u16) = (1364, 1365);

/// CCC descriptor bit enabling indications.
const CCC_INDICATE: u8 = 0x02;

pub fn adv_interval(mode: AdvertisingMode) -> (u16, u16) {
    match mode {
        AdvertisingMode::Fast => ADV_FAST_INTERVAL,
        AdvertisingMode::Slow => ADV_SLOW_INTERVAL,
    }
}

/// Whether a CCC descriptor write turns indications on.
pub fn ccc_enables_indications(value: &[u8]) -> bool {
    value.first().is_some_and(|b| b & CCC_INDICATE != 0)
}

// ───────────────────────────────────────────────────────────────
// Event bridge
// ───────────────────────────────────────────────────────────────
//
// Bluedroid callbacks are C function pointers that cannot capture Rust
// closures.  The hub is installed once at boot and looked up from there.

static LINK: OnceLock<Arc<LinkHub>> = OnceLock::new();

/// Route stack events to `hub`.  Only the first call has an effect.
pub fn install_link(hub: Arc<LinkHub>) {
    if LINK.set(hub).is_err() {
        warn!("BLE: link hub already installed");
    }
}

fn link() -> Option<&'static Arc<LinkHub>> {
    LINK.get()
}

// ── ESP-IDF static state ─────────────────────────────────────

#[cfg(target_os = "espidf")]
use core::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

#[cfg(target_os = "espidf")]
static BLE_GATTS_IF: AtomicU32 = AtomicU32::new(0);
#[cfg(target_os = "espidf")]
static BLE_SVC_HANDLE: AtomicU32 = AtomicU32::new(0);
#[cfg(target_os = "espidf")]
static BLE_DATA_CHAR_HANDLE: AtomicU32 = AtomicU32::new(0);
#[cfg(target_os = "espidf")]
static BLE_DATA_CCC_HANDLE: AtomicU32 = AtomicU32::new(0);
#[cfg(target_os = "espidf")]
static BLE_TICK_CHAR_HANDLE: AtomicU32 = AtomicU32::new(0);
#[cfg(target_os = "espidf")]
static BLE_STATUS_CHAR_HANDLE: AtomicU32 = AtomicU32::new(0);
#[cfg(target_os = "espidf")]
static BLE_CONN_ID: AtomicU32 = AtomicU32::new(u32::MAX);
#[cfg(target_os = "espidf")]
static BLE_CHAR_STEP: AtomicU32 = AtomicU32::new(0);
#[cfg(target_os = "espidf")]
static BLE_TICK_VALUE: core::sync::atomic::AtomicU8 = core::sync::atomic::AtomicU8::new(8);

#[cfg(target_os = "espidf")]
fn uuid128_to_esp(uuid: u128) -> esp_idf_svc::sys::esp_bt_uuid_t {
    let mut t: esp_idf_svc::sys::esp_bt_uuid_t = unsafe { core::mem::zeroed() };
    t.len = 16;
    unsafe {
        t.uuid.uuid128 = uuid.to_le_bytes();
    }
    t
}

#[cfg(target_os = "espidf")]
unsafe fn add_gatt_char(svc_handle: u16, uuid: u128, perm: u32, prop: u32, initial: &mut [u8]) {
    use esp_idf_svc::sys::*;
    let mut char_uuid = uuid128_to_esp(uuid);
    let mut value = esp_attr_value_t {
        attr_max_len: initial.len() as u16,
        attr_len: initial.len() as u16,
        attr_value: initial.as_mut_ptr(),
    };
    let ret = unsafe {
        esp_ble_gatts_add_char(
            svc_handle,
            &mut char_uuid,
            perm as esp_gatt_perm_t,
            prop as esp_gatt_char_prop_t,
            &mut value,
            core::ptr::null_mut(),
        )
    };
    if ret != ESP_OK as i32 {
        log::error!("BLE GATTS: add_char failed ({})", ret);
    }
}

#[cfg(target_os = "espidf")]
unsafe fn add_ccc_descriptor(svc_handle: u16) {
    use esp_idf_svc::sys::*;
    let mut uuid: esp_bt_uuid_t = unsafe { core::mem::zeroed() };
    uuid.len = 2;
    uuid.uuid.uuid16 = ESP_GATT_UUID_CHAR_CLIENT_CONFIG as u16;
    let ret = unsafe {
        esp_ble_gatts_add_char_descr(
            svc_handle,
            &mut uuid,
            (ESP_GATT_PERM_READ | ESP_GATT_PERM_WRITE) as esp_gatt_perm_t,
            core::ptr::null_mut(),
            core::ptr::null_mut(),
        )
    };
    if ret != ESP_OK as i32 {
        log::error!("BLE GATTS: add_char_descr failed ({})", ret);
    }
}

#[cfg(target_os = "espidf")]
unsafe extern "C" fn ble_gap_event_handler(
    event: esp_idf_svc::sys::esp_gap_ble_cb_event_t,
    param: *mut esp_idf_svc::sys::esp_ble_gap_cb_param_t,
) {
    use esp_idf_svc::sys::*;
    match event {
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_START_COMPLETE_EVT => {
            let status = unsafe { (*param).adv_start_cmpl.status };
            if status == esp_bt_status_t_ESP_BT_STATUS_SUCCESS {
                log::info!("BLE GAP: advertising started");
            } else {
                log::warn!("BLE GAP: advertising start failed ({})", status);
            }
        }
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_STOP_COMPLETE_EVT => {
            log::info!("BLE GAP: advertising stopped");
        }
        _ => {}
    }
}

#[cfg(target_os = "espidf")]
unsafe extern "C" fn ble_gatts_event_handler(
    event: esp_idf_svc::sys::esp_gatts_cb_event_t,
    gatts_if: esp_idf_svc::sys::esp_gatt_if_t,
    param: *mut esp_idf_svc::sys::esp_ble_gatts_cb_param_t,
) {
    use esp_idf_svc::sys::*;

    match event {
        esp_gatts_cb_event_t_ESP_GATTS_REG_EVT => {
            BLE_GATTS_IF.store(gatts_if as u32, AtomicOrdering::Relaxed);
            log::info!("BLE GATTS: app registered (if={})", gatts_if);
            let mut svc_id = esp_gatt_srvc_id_t {
                id: esp_gatt_id_t {
                    uuid: uuid128_to_esp(SERVICE_UUID),
                    inst_id: 0,
                },
                is_primary: true,
            };
            unsafe { esp_ble_gatts_create_service(gatts_if, &mut svc_id, 12) };
        }
        esp_gatts_cb_event_t_ESP_GATTS_CREATE_EVT => {
            let svc_handle = unsafe { (*param).create.service_handle };
            BLE_SVC_HANDLE.store(u32::from(svc_handle), AtomicOrdering::Relaxed);
            log::info!("BLE GATTS: service created (handle={})", svc_handle);
            unsafe { esp_ble_gatts_start_service(svc_handle) };
            BLE_CHAR_STEP.store(1, AtomicOrdering::Relaxed);
            unsafe {
                add_gatt_char(
                    svc_handle,
                    CHAR_POUR_DATA,
                    ESP_GATT_PERM_READ,
                    ESP_GATT_CHAR_PROP_BIT_INDICATE,
                    &mut [0u8; 1],
                );
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_EVT => {
            let handle = u32::from(unsafe { (*param).add_char.attr_handle });
            let svc_handle = BLE_SVC_HANDLE.load(AtomicOrdering::Relaxed) as u16;
            match BLE_CHAR_STEP.load(AtomicOrdering::Relaxed) {
                1 => {
                    BLE_DATA_CHAR_HANDLE.store(handle, AtomicOrdering::Relaxed);
                    log::info!("BLE GATTS: data char (handle={})", handle);
                    BLE_CHAR_STEP.store(2, AtomicOrdering::Relaxed);
                    unsafe { add_ccc_descriptor(svc_handle) };
                }
                3 => {
                    BLE_TICK_CHAR_HANDLE.store(handle, AtomicOrdering::Relaxed);
                    log::info!("BLE GATTS: tick char (handle={})", handle);
                    BLE_CHAR_STEP.store(4, AtomicOrdering::Relaxed);
                    unsafe {
                        add_gatt_char(
                            svc_handle,
                            CHAR_STATUS,
                            ESP_GATT_PERM_READ | ESP_GATT_PERM_WRITE,
                            ESP_GATT_CHAR_PROP_BIT_READ
                                | ESP_GATT_CHAR_PROP_BIT_WRITE
                                | ESP_GATT_CHAR_PROP_BIT_NOTIFY,
                            &mut [0u8; 1],
                        );
                    }
                }
                4 => {
                    BLE_STATUS_CHAR_HANDLE.store(handle, AtomicOrdering::Relaxed);
                    BLE_CHAR_STEP.store(5, AtomicOrdering::Relaxed);
                    log::info!("BLE GATTS: status char (handle={}), all registered", handle);
                }
                _ => {}
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_DESCR_EVT => {
            let handle = u32::from(unsafe { (*param).add_char_descr.attr_handle });
            if BLE_CHAR_STEP.load(AtomicOrdering::Relaxed) == 2 {
                BLE_DATA_CCC_HANDLE.store(handle, AtomicOrdering::Relaxed);
                BLE_CHAR_STEP.store(3, AtomicOrdering::Relaxed);
                let svc_handle = BLE_SVC_HANDLE.load(AtomicOrdering::Relaxed) as u16;
                let mut tick = [BLE_TICK_VALUE.load(AtomicOrdering::Relaxed)];
                unsafe {
                    add_gatt_char(
                        svc_handle,
                        CHAR_TICK_DURATION,
                        ESP_GATT_PERM_READ,
                        ESP_GATT_CHAR_PROP_BIT_READ | ESP_GATT_CHAR_PROP_BIT_NOTIFY,
                        &mut tick,
                    );
                }
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_CONNECT_EVT => {
            let conn = unsafe { (*param).connect.conn_id };
            log::info!("BLE GATTS: client connected (conn_id={})", conn);
            if let Some(hub) = link() {
                if hub.on_connected(conn) {
                    BLE_CONN_ID.store(u32::from(conn), AtomicOrdering::Relaxed);
                }
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_DISCONNECT_EVT => {
            let conn = unsafe { (*param).disconnect.conn_id };
            log::info!("BLE GATTS: client disconnected (conn_id={})", conn);
            if BLE_CONN_ID.load(AtomicOrdering::Relaxed) == u32::from(conn) {
                BLE_CONN_ID.store(u32::MAX, AtomicOrdering::Relaxed);
            }
            if let Some(hub) = link() {
                hub.on_disconnected(conn);
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_MTU_EVT => {
            let mtu = unsafe { (*param).mtu.mtu };
            if let Some(hub) = link() {
                hub.on_mtu_updated(mtu, mtu);
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_CONF_EVT => {
            let status = unsafe { (*param).conf.status };
            let result = if status == esp_gatt_status_t_ESP_GATT_OK {
                Ok(())
            } else {
                Err(TransportError::Stack(status as i32))
            };
            if let Some(hub) = link() {
                hub.on_indication_complete(result);
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_WRITE_EVT => {
            let p = unsafe { &(*param).write };
            let handle = u32::from(p.handle);
            let data = unsafe { core::slice::from_raw_parts(p.value, usize::from(p.len)) };

            if let Some(hub) = link() {
                if handle == BLE_DATA_CCC_HANDLE.load(AtomicOrdering::Relaxed) {
                    hub.on_subscription_changed(ccc_enables_indications(data));
                } else if handle == BLE_STATUS_CHAR_HANDLE.load(AtomicOrdering::Relaxed) {
                    hub.on_status_write(data);
                }
            }
            if p.need_rsp {
                unsafe {
                    esp_ble_gatts_send_response(
                        gatts_if,
                        p.conn_id,
                        p.trans_id,
                        esp_gatt_status_t_ESP_GATT_OK,
                        core::ptr::null_mut(),
                    );
                }
            }
        }
        _ => {}
    }
}

// ───────────────────────────────────────────────────────────────
// BLE radio handle
// ───────────────────────────────────────────────────────────────

/// Cheap, cloneable handle to the BLE stack.  One clone serves as the
/// indication transport, one as the advertiser and one as the status
/// publisher.
#[derive(Debug, Clone)]
pub struct BleRadio {
    device_name: heapless::String<24>,
}

impl BleRadio {
    pub fn new(device_name: heapless::String<24>) -> Self {
        Self { device_name }
    }

    /// Bring up the controller and GATT server.
    #[cfg(target_os = "espidf")]
    pub fn init(&self, tick_duration_us: u8) -> Result<(), TransportError> {
        use esp_idf_svc::sys::*;
        BLE_TICK_VALUE.store(tick_duration_us, AtomicOrdering::Relaxed);
        unsafe {
            esp_bt_controller_mem_release(esp_bt_mode_t_ESP_BT_MODE_CLASSIC_BT);

            let mut bt_cfg = esp_bt_controller_config_t::default();
            check(esp_bt_controller_init(&mut bt_cfg), "bt_controller_init")?;
            check(
                esp_bt_controller_enable(esp_bt_mode_t_ESP_BT_MODE_BLE),
                "bt_controller_enable",
            )?;
            check(esp_bluedroid_init(), "bluedroid_init")?;
            check(esp_bluedroid_enable(), "bluedroid_enable")?;

            esp_ble_gap_register_callback(Some(ble_gap_event_handler));
            esp_ble_gatts_register_callback(Some(ble_gatts_event_handler));
            check(esp_ble_gatts_app_register(0), "gatts_app_register")?;

            let mut name = heapless::Vec::<u8, 25>::new();
            let _ = name.extend_from_slice(self.device_name.as_bytes());
            let _ = name.push(0);
            esp_ble_gap_set_device_name(name.as_ptr() as *const _);

            let mut adv_data = esp_ble_adv_data_t {
                set_scan_rsp: false,
                include_name: true,
                flag: (ESP_BLE_ADV_FLAG_GEN_DISC | ESP_BLE_ADV_FLAG_BREDR_NOT_SPT) as u8,
                ..core::mem::zeroed()
            };
            check(esp_ble_gap_config_adv_data(&mut adv_data), "config_adv_data")?;

            let mut service = SERVICE_UUID.to_le_bytes();
            let mut scan_rsp = esp_ble_adv_data_t {
                set_scan_rsp: true,
                service_uuid_len: service.len() as u16,
                p_service_uuid: service.as_mut_ptr(),
                ..core::mem::zeroed()
            };
            check(esp_ble_gap_config_adv_data(&mut scan_rsp), "config_scan_rsp")?;
        }
        info!("BLE(espidf): Bluedroid stack initialized as '{}'", self.device_name);
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn init(&self, tick_duration_us: u8) -> Result<(), TransportError> {
        info!(
            "BLE(sim): '{}' service {:032x}, tick {}us",
            self.device_name, SERVICE_UUID, tick_duration_us
        );
        Ok(())
    }
}

#[cfg(target_os = "espidf")]
fn check(ret: i32, what: &str) -> Result<(), TransportError> {
    if ret == esp_idf_svc::sys::ESP_OK as i32 {
        Ok(())
    } else {
        log::error!("BLE: {} failed ({})", what, ret);
        Err(TransportError::Stack(ret))
    }
}

// ── IndicationTransport ──────────────────────────────────────

impl IndicationTransport for BleRadio {
    #[cfg(target_os = "espidf")]
    fn indicate(&self, conn: ConnHandle, packet: &[u8]) -> Result<(), TransportError> {
        use esp_idf_svc::sys::*;
        if BLE_DATA_CCC_HANDLE.load(AtomicOrdering::Relaxed) == 0 {
            return Err(TransportError::NotSubscribed);
        }
        let ret = unsafe {
            esp_ble_gatts_send_indicate(
                BLE_GATTS_IF.load(AtomicOrdering::Relaxed) as esp_gatt_if_t,
                conn,
                BLE_DATA_CHAR_HANDLE.load(AtomicOrdering::Relaxed) as u16,
                packet.len() as u16,
                packet.as_ptr() as *mut u8,
                true,
            )
        };
        match ret {
            r if r == ESP_OK as i32 => Ok(()),
            r if r == ESP_ERR_NO_MEM as i32 => Err(TransportError::Busy),
            r if r == ESP_ERR_INVALID_SIZE as i32 => Err(TransportError::MtuExceeded),
            r => Err(TransportError::Stack(r)),
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn indicate(&self, conn: ConnHandle, packet: &[u8]) -> Result<(), TransportError> {
        log::debug!("BLE(sim): indicate {}B on conn {}", packet.len(), conn);
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn disconnect(&self, conn: ConnHandle) {
        let ret = unsafe {
            esp_idf_svc::sys::esp_ble_gatts_close(
                BLE_GATTS_IF.load(AtomicOrdering::Relaxed) as esp_idf_svc::sys::esp_gatt_if_t,
                conn,
            )
        };
        if ret != esp_idf_svc::sys::ESP_OK as i32 {
            warn!("BLE: disconnect of {} failed ({})", conn, ret);
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn disconnect(&self, conn: ConnHandle) {
        info!("BLE(sim): disconnect conn {}", conn);
    }
}

// ── AdvertiserPort ───────────────────────────────────────────

impl AdvertiserPort for BleRadio {
    #[cfg(target_os = "espidf")]
    fn start(&mut self, mode: AdvertisingMode) -> Result<(), TransportError> {
        use esp_idf_svc::sys::*;
        let (min, max) = adv_interval(mode);
        let mut params = esp_ble_adv_params_t {
            adv_int_min: min,
            adv_int_max: max,
            adv_type: esp_ble_adv_type_t_ADV_TYPE_IND,
            own_addr_type: esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC,
            channel_map: esp_ble_adv_channel_t_ADV_CHNL_ALL,
            adv_filter_policy: esp_ble_adv_filter_t_ADV_FILTER_ALLOW_SCAN_ANY_CON_ANY,
            ..unsafe { core::mem::zeroed() }
        };
        check(
            unsafe { esp_ble_gap_start_advertising(&mut params) },
            "start_advertising",
        )
    }

    #[cfg(not(target_os = "espidf"))]
    fn start(&mut self, mode: AdvertisingMode) -> Result<(), TransportError> {
        let (min, max) = adv_interval(mode);
        info!(
            "BLE(sim): advertising '{}' {:?} ({}..{})",
            self.device_name, mode, min, max
        );
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn stop(&mut self) -> Result<(), TransportError> {
        check(
            unsafe { esp_idf_svc::sys::esp_ble_gap_stop_advertising() },
            "stop_advertising",
        )
    }

    #[cfg(not(target_os = "espidf"))]
    fn stop(&mut self) -> Result<(), TransportError> {
        info!("BLE(sim): advertising stopped");
        Ok(())
    }
}

// ── StatusPort ───────────────────────────────────────────────

impl StatusPort for BleRadio {
    #[cfg(target_os = "espidf")]
    fn publish_status(&self, status: u8) {
        use esp_idf_svc::sys::*;
        let handle = BLE_STATUS_CHAR_HANDLE.load(AtomicOrdering::Relaxed) as u16;
        if handle == 0 {
            return;
        }
        let mut value = [status];
        unsafe {
            esp_ble_gatts_set_attr_value(handle, 1, value.as_ptr());
        }
        let conn = BLE_CONN_ID.load(AtomicOrdering::Relaxed);
        if conn == u32::MAX {
            return;
        }
        let ret = unsafe {
            esp_ble_gatts_send_indicate(
                BLE_GATTS_IF.load(AtomicOrdering::Relaxed) as esp_gatt_if_t,
                conn as u16,
                handle,
                1,
                value.as_mut_ptr(),
                false,
            )
        };
        if ret != ESP_OK as i32 {
            warn!("BLE: status notify failed ({})", ret);
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn publish_status(&self, status: u8) {
        info!("BLE(sim): status 0x{:02x}", status);
    }
}
