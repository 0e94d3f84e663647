//! Consumer-side reassembly of a bulk transfer.
//!
//! DATA payloads are concatenated in arrival order; chunk indices are
//! informational only.  Used by host tooling and the integration tests to
//! check what a peer would rebuild from the indications.

extern crate alloc;
use alloc::vec::Vec;

use super::packet::{Packet, PacketError};

/// One completed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub calibration: u16,
    pub timestamps: Vec<u32>,
}

#[derive(Default)]
pub struct TransferReassembler {
    expected: Option<u16>,
    calibration: u16,
    bytes: Vec<u8>,
}

impl TransferReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw indication.
    ///
    /// Returns `Some(transfer)` on END, `None` while more packets are
    /// expected.  A new START always discards a partial transfer.
    pub fn feed(&mut self, raw: &[u8]) -> Result<Option<Transfer>, PacketError> {
        match Packet::decode(raw)? {
            Packet::Start {
                count, calibration, ..
            } => {
                self.expected = Some(count);
                self.calibration = calibration;
                self.bytes.clear();
                Ok(None)
            }
            Packet::Data { payload, .. } => {
                if self.expected.is_none() {
                    return Err(PacketError::NoSession);
                }
                self.bytes.extend_from_slice(payload);
                Ok(None)
            }
            Packet::End => {
                let count = self.expected.take().ok_or(PacketError::NoSession)?;
                if self.bytes.len() != usize::from(count) * 4 {
                    self.bytes.clear();
                    return Err(PacketError::Incomplete);
                }
                let timestamps = self
                    .bytes
                    .chunks_exact(4)
                    .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect();
                self.bytes.clear();
                Ok(Some(Transfer {
                    calibration: self.calibration,
                    timestamps,
                }))
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.expected.is_some()
    }
}
