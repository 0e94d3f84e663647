//! Outgoing bulk data buffer and send cursor.
//!
//! Created once at boot and reused for every pour.  The producer loads
//! the timestamps before the engine marks the transfer active; from then on
//! the buffer is read-only and only the cursor moves.

use super::packet::MAX_SDU_SIZE;
use crate::error::TransferError;
use crate::sensors::pulse::MAX_TIMESTAMPS;

/// Buffer capacity in bytes.
pub const MAX_SESSION_BYTES: usize = MAX_TIMESTAMPS * 4;

/// Timestamp bytes plus the position of the next unsent byte.
///
/// `cursor <= count * 4` always holds.
pub struct BulkDataSession {
    buffer: [u8; MAX_SESSION_BYTES],
    count: u16,
    cursor: usize,
}

impl Default for BulkDataSession {
    fn default() -> Self {
        Self::new()
    }
}

impl BulkDataSession {
    pub const fn new() -> Self {
        Self {
            buffer: [0; MAX_SESSION_BYTES],
            count: 0,
            cursor: 0,
        }
    }

    /// Copy `timestamps` in as little-endian bytes and rewind the cursor.
    pub fn load(&mut self, timestamps: &[u32]) -> Result<(), TransferError> {
        if timestamps.is_empty() || timestamps.len() > MAX_TIMESTAMPS {
            return Err(TransferError::InvalidLength);
        }
        for (dst, ts) in self.buffer.chunks_exact_mut(4).zip(timestamps) {
            dst.copy_from_slice(&ts.to_le_bytes());
        }
        self.count = timestamps.len() as u16;
        self.cursor = 0;
        Ok(())
    }

    pub fn count(&self) -> u16 {
        self.count
    }

    pub fn total_bytes(&self) -> usize {
        usize::from(self.count) * 4
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.total_bytes() - self.cursor
    }

    /// The next DATA chunk for `sdu_size`: `(chunk_index, payload)`, or
    /// `None` once every byte has been sent.
    pub fn next_chunk(&self, sdu_size: u16) -> Option<(u16, &[u8])> {
        let sdu = usize::from(sdu_size.clamp(1, MAX_SDU_SIZE));
        let remaining = self.remaining();
        if remaining == 0 {
            return None;
        }
        let len = sdu.min(remaining);
        let index = (self.cursor / sdu) as u16;
        Some((index, &self.buffer[self.cursor..self.cursor + len]))
    }

    /// Mark `len` more bytes as sent.
    pub fn advance(&mut self, len: usize) {
        self.cursor = (self.cursor + len).min(self.total_bytes());
    }
}
