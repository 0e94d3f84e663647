//! Wire format of the bulk timestamp transfer.
//!
//! Every indication starts with a 4-byte header, little-endian, no padding:
//!
//! ```text
//!  byte 0      1..=2             3
//! ┌──────┬──────────────────┬──────────┐
//! │ flag │ chunk index (LE) │ length   │
//! └──────┴──────────────────┴──────────┘
//!
//!  START  AA | 0 | sdu | count u16 LE | calibration u16 LE
//!  DATA   BB | idx | n | n bytes of raw u32 LE timestamps
//!  END    CC | 0 | 0
//! ```
//!
//! The START length byte advertises the chunk size the sender is about to
//! use.  DATA chunk indices are `cursor / sdu_size` and are not unique
//! when the SDU changes mid-session; consumers concatenate by arrival order.

use core::fmt;

pub const HEADER_LEN: usize = 4;
/// Bytes after the START header: element count + calibration constant.
pub const START_BODY_LEN: usize = 4;
/// Headroom the radio stack needs on top of our header (ATT opcode + handle).
pub const ATT_RESERVE: u16 = 3;
/// Chunk size before any MTU exchange (default ATT MTU 23 − 4 − 3).
pub const DEFAULT_SDU_SIZE: u16 = 16;
/// Largest chunk the device will ever send.
pub const MAX_SDU_SIZE: u16 = 243;
pub const MAX_PACKET_LEN: usize = HEADER_LEN + MAX_SDU_SIZE as usize;

/// Owned, stack-allocated packet ready for the transport.
pub type PacketBuf = heapless::Vec<u8, MAX_PACKET_LEN>;

/// Packet type flag (header byte 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    Start = 0xAA,
    Data = 0xBB,
    End = 0xCC,
}

impl TryFrom<u8> for PacketKind {
    type Error = PacketError;

    fn try_from(flag: u8) -> Result<Self, PacketError> {
        match flag {
            0xAA => Ok(Self::Start),
            0xBB => Ok(Self::Data),
            0xCC => Ok(Self::End),
            other => Err(PacketError::UnknownFlag(other)),
        }
    }
}

/// Decoded 4-byte header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub kind: PacketKind,
    pub chunk_index: u16,
    pub len: u8,
}

impl PacketHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let idx = self.chunk_index.to_le_bytes();
        [self.kind as u8, idx[0], idx[1], self.len]
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < HEADER_LEN {
            return Err(PacketError::TooShort);
        }
        Ok(Self {
            kind: PacketKind::try_from(bytes[0])?,
            chunk_index: u16::from_le_bytes([bytes[1], bytes[2]]),
            len: bytes[3],
        })
    }
}

/// A decoded packet borrowing its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packet<'a> {
    Start {
        count: u16,
        calibration: u16,
        sdu_size: u8,
    },
    Data {
        chunk_index: u16,
        payload: &'a [u8],
    },
    End,
}

impl<'a> Packet<'a> {
    pub fn decode(bytes: &'a [u8]) -> Result<Self, PacketError> {
        let header = PacketHeader::decode(bytes)?;
        let body = &bytes[HEADER_LEN..];
        match header.kind {
            PacketKind::Start => {
                if body.len() < START_BODY_LEN {
                    return Err(PacketError::TooShort);
                }
                Ok(Self::Start {
                    count: u16::from_le_bytes([body[0], body[1]]),
                    calibration: u16::from_le_bytes([body[2], body[3]]),
                    sdu_size: header.len,
                })
            }
            PacketKind::Data => {
                if body.len() != usize::from(header.len) {
                    return Err(PacketError::LengthMismatch);
                }
                Ok(Self::Data {
                    chunk_index: header.chunk_index,
                    payload: body,
                })
            }
            PacketKind::End => Ok(Self::End),
        }
    }
}

/// Errors decoding a packet on the consumer side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    TooShort,
    UnknownFlag(u8),
    /// DATA length byte disagrees with the bytes received.
    LengthMismatch,
    /// DATA or END without a preceding START.
    NoSession,
    /// END arrived before `count` timestamps were received.
    Incomplete,
}

impl fmt::Display for PacketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort => write!(f, "packet too short"),
            Self::UnknownFlag(flag) => write!(f, "unknown flag 0x{flag:02X}"),
            Self::LengthMismatch => write!(f, "length byte mismatch"),
            Self::NoSession => write!(f, "no session started"),
            Self::Incomplete => write!(f, "session ended early"),
        }
    }
}

// ── Encoders ─────────────────────────────────────────────────

fn with_header(kind: PacketKind, chunk_index: u16, len: u8, body: &[u8]) -> PacketBuf {
    let mut buf = PacketBuf::new();
    // Callers never pass more than MAX_SDU_SIZE bytes of body.
    let _ = buf.extend_from_slice(
        &PacketHeader {
            kind,
            chunk_index,
            len,
        }
        .encode(),
    );
    let room = MAX_PACKET_LEN - HEADER_LEN;
    let _ = buf.extend_from_slice(&body[..body.len().min(room)]);
    buf
}

pub fn encode_start(count: u16, calibration: u16, sdu_size: u16) -> PacketBuf {
    let c = count.to_le_bytes();
    let k = calibration.to_le_bytes();
    with_header(
        PacketKind::Start,
        0,
        sdu_size.min(u16::from(u8::MAX)) as u8,
        &[c[0], c[1], k[0], k[1]],
    )
}

/// `payload` must not exceed [`MAX_SDU_SIZE`]; longer input is truncated.
pub fn encode_data(chunk_index: u16, payload: &[u8]) -> PacketBuf {
    let len = payload.len().min(usize::from(MAX_SDU_SIZE));
    with_header(PacketKind::Data, chunk_index, len as u8, &payload[..len])
}

pub fn encode_end() -> PacketBuf {
    with_header(PacketKind::End, 0, 0, &[])
}
