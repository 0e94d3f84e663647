//! Radio-stack event hub.
//!
//! The GATT adapter forwards every stack callback here.  The hub fans them
//! out to the transfer engine, the advertising machine and the input
//! router:
//!
//! ```text
//!   GAP/GATT callbacks ──▶ LinkHub ──┬──▶ TransferEngine   (link, ack, MTU, CCC)
//!                                    ├──▶ Advertising      (stop on connect,
//!                                    │                       fast on disconnect)
//!                                    └──▶ InputRouter      (status writes)
//! ```
//!
//! Callbacks run in the stack's own task.  Starting advertising is
//! deferred; stopping it takes the advertising lock, which its driver only
//! holds for a few microseconds per cycle.

use super::inputs::InputRouter;
use crate::error::TransportError;
use crate::fsm::advertising::Advertising;
use crate::transfer::{ConnHandle, TransferEngine};
use log::warn;
use std::sync::Arc;

pub struct LinkHub {
    engine: Arc<TransferEngine>,
    advertising: Advertising,
    router: Arc<InputRouter>,
}

impl LinkHub {
    pub fn new(engine: Arc<TransferEngine>, advertising: Advertising, router: Arc<InputRouter>) -> Self {
        Self {
            engine,
            advertising,
            router,
        }
    }

    /// A central connected.  Returns `false` if it was turned away because
    /// another peer holds the link.
    pub fn on_connected(&self, conn: ConnHandle) -> bool {
        if !self.engine.on_connected(conn) {
            return false;
        }
        if let Err(e) = self.advertising.stop() {
            warn!("BLE: stopping advertising on connect failed: {}", e);
        }
        true
    }

    pub fn on_disconnected(&self, conn: ConnHandle) {
        let was_ours = self.engine.is_connected();
        self.engine.on_disconnected(conn);
        if was_ours && !self.engine.is_connected() {
            if let Err(e) = self.advertising.start_fast() {
                warn!("BLE: cannot restart advertising: {}", e);
            }
        }
    }

    pub fn on_subscription_changed(&self, enabled: bool) {
        self.engine.on_subscription_changed(enabled);
    }

    pub fn on_mtu_updated(&self, tx_mtu: u16, rx_mtu: u16) {
        self.engine.on_mtu_updated(tx_mtu, rx_mtu);
    }

    pub fn on_indication_complete(&self, result: Result<(), TransportError>) {
        self.engine.on_indication_complete(result);
    }

    /// The peer wrote the status characteristic.  Only the first byte is
    /// meaningful.
    pub fn on_status_write(&self, value: &[u8]) {
        match value.first() {
            Some(&byte) => self.router.on_remote_command(byte),
            None => warn!("BLE: empty status write ignored"),
        }
    }
}
