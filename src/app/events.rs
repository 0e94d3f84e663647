//! Outbound status.
//!
//! Every lifecycle transition is mirrored to the peer as one byte on the
//! status characteristic:
//!
//! ```text
//!   bit  7     6..4      3..0
//!      ┌─────┬────────┬─────────────┐
//!      │ cal │ unused │ state index │
//!      └─────┴────────┴─────────────┘
//! ```

use crate::fsm::StateId;
use crate::fsm::states::LifecycleState;

const STATE_MASK: u8 = 0x0F;
const CALIBRATION_VALID: u8 = 0x80;

/// Snapshot published after each lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStatus {
    pub state: LifecycleState,
    /// The last calibration attempt saw a qualifying burst.
    pub calibration_valid: bool,
}

impl DeviceStatus {
    pub fn encode(self) -> u8 {
        let mut byte = self.state as u8 & STATE_MASK;
        if self.calibration_valid {
            byte |= CALIBRATION_VALID;
        }
        byte
    }

    /// Inverse of [`encode`](Self::encode); `None` for an unknown state.
    pub fn decode(byte: u8) -> Option<Self> {
        let state = LifecycleState::from_index(usize::from(byte & STATE_MASK))?;
        Some(Self {
            state,
            calibration_valid: byte & CALIBRATION_VALID != 0,
        })
    }
}
