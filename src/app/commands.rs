//! Inbound commands.
//!
//! Button gestures arrive already classified by the button driver; remote
//! commands arrive as single bytes written to the status characteristic.
//! The [`InputRouter`](super::inputs::InputRouter) turns both into
//! lifecycle transition requests.

use crate::fsm::states::LifecycleState;

/// Classified gestures on the front button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonClick {
    Single,
    Double,
    Long,
}

/// Lifecycle targets a connected peer may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RemoteCommand {
    Idle = 0,
    Ready = 1,
    Calibrate = 2,
}

impl RemoteCommand {
    pub fn target(self) -> LifecycleState {
        match self {
            Self::Idle => LifecycleState::Idle,
            Self::Ready => LifecycleState::Ready,
            Self::Calibrate => LifecycleState::Calibrating,
        }
    }
}

impl TryFrom<u8> for RemoteCommand {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Idle),
            1 => Ok(Self::Ready),
            2 => Ok(Self::Calibrate),
            other => Err(other),
        }
    }
}
