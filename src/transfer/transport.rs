//! Indication transport abstraction.
//!
//! The engine needs exactly two things from the radio stack: push one
//! packet as an acknowledged indication, and drop a connection.
//! Acknowledgments come back asynchronously through
//! [`TransferEngine::on_indication_complete`](super::TransferEngine::on_indication_complete).
//!
//! Concrete implementations:
//! - Bluedroid GATT server (`adapters::ble`, ESP-IDF only)
//! - Simulation transport (`adapters::ble`, host)
//! - Recording mocks in the integration tests

use crate::error::TransportError;

/// Radio-stack connection handle.
pub type ConnHandle = u16;

pub trait IndicationTransport: Send + Sync {
    /// Queue `packet` as an indication on the data characteristic.
    /// `Ok` means queued, not acknowledged.
    fn indicate(&self, conn: ConnHandle, packet: &[u8]) -> Result<(), TransportError>;

    /// Terminate `conn`.  Completion is reported as a disconnect event.
    fn disconnect(&self, conn: ConnHandle);
}
