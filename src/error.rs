//! Unified error types for the Trichter firmware.
//!
//! Three families, matching the three layers that can fail:
//!
//! - [`FsmError`]: outcome codes of state behaviours and the transition
//!   validator.  `TransitionForbidden` and `NoImplementation` are expected,
//!   non-fatal outcomes; everything else escalates the owning machine.
//! - [`TransferError`]: local to the chunked transfer engine and always
//!   recoverable by the caller.
//! - [`TransportError`]: what the radio stack reported for a single send.
//!
//! All variants are `Copy` so they can be stored in atomics-adjacent state
//! and passed through the FSM without allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// State machine outcome codes
// ---------------------------------------------------------------------------

/// Outcome codes shared by every state behaviour and kernel operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FsmError {
    /// A collaborator call failed.  Escalates the machine to its error state.
    ApiFailure = 1,
    /// Malformed table, or a target outside the table.
    InvalidParameter = 5,
    /// Target is not in the current state's allowed set.
    TransitionForbidden = 10,
    /// The state has no hook in this slot.  Treated as success.
    NoImplementation = 69,
}

impl FsmError {
    /// Raw outcome code, as mirrored in logs.
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// `true` for the outcomes the kernel treats as success.
    pub const fn is_benign(self) -> bool {
        matches!(self, Self::NoImplementation)
    }
}

impl fmt::Display for FsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiFailure => write!(f, "collaborator call failed"),
            Self::InvalidParameter => write!(f, "invalid parameter"),
            Self::TransitionForbidden => write!(f, "transition forbidden"),
            Self::NoImplementation => write!(f, "no implementation"),
        }
    }
}

impl From<TransferError> for FsmError {
    fn from(_: TransferError) -> Self {
        Self::ApiFailure
    }
}

// ---------------------------------------------------------------------------
// Transport errors (single indication send)
// ---------------------------------------------------------------------------

/// Errors reported by an [`IndicationTransport`](crate::transfer::IndicationTransport).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// No buffers available in the radio stack right now.
    Busy,
    /// The peer has not enabled indications on the characteristic.
    NotSubscribed,
    /// Packet larger than the negotiated MTU.
    MtuExceeded,
    /// Any other stack failure, with the raw platform code.
    Stack(i32),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Busy => write!(f, "link busy"),
            Self::NotSubscribed => write!(f, "peer not subscribed"),
            Self::MtuExceeded => write!(f, "packet exceeds MTU"),
            Self::Stack(code) => write!(f, "stack error {code}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Transfer engine errors
// ---------------------------------------------------------------------------

/// Errors returned by the chunked transfer engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferError {
    /// No peer is connected.
    NotConnected,
    /// The session was cancelled (disconnect, indications disabled, retries
    /// exhausted) while the caller waited.
    Cancelled,
    /// The previous send was not acknowledged within the ack timeout.
    Timeout,
    /// `prepare` was given zero or too many timestamps.
    InvalidLength,
    /// The radio stack refused the send.
    Transport(TransportError),
}

impl TransferError {
    /// `true` when the caller should simply try again on its next cycle.
    pub const fn is_transient(self) -> bool {
        matches!(
            self,
            Self::NotConnected
                | Self::Cancelled
                | Self::Timeout
                | Self::Transport(TransportError::Busy)
        )
    }
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not connected"),
            Self::Cancelled => write!(f, "transfer cancelled"),
            Self::Timeout => write!(f, "acknowledgment timeout"),
            Self::InvalidLength => write!(f, "invalid timestamp count"),
            Self::Transport(e) => write!(f, "transport: {e}"),
        }
    }
}

impl From<TransportError> for TransferError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl std::error::Error for FsmError {}
impl std::error::Error for TransportError {}
impl std::error::Error for TransferError {}

/// Convenience alias used by the state behaviours.
pub type Result<T> = core::result::Result<T, FsmError>;
