//! Device run states carried by StateChange packets

use serde::{Deserialize, Serialize};

/// Run state of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceState {
    Idle,
    Running,
    Stop,
    Init,
    Reset,
    /// A state code this crate does not name
    Other(u8),
}

impl DeviceState {
    /// Wire code of this state
    pub const fn code(self) -> u8 {
        match self {
            DeviceState::Idle => 0x00,
            DeviceState::Running => 0x01,
            DeviceState::Stop => 0x02,
            DeviceState::Init => 0x80,
            DeviceState::Reset => 0x81,
            DeviceState::Other(code) => code,
        }
    }

    /// Convert from a wire code
    pub const fn from_code(code: u8) -> Self {
        match code {
            0x00 => DeviceState::Idle,
            0x01 => DeviceState::Running,
            0x02 => DeviceState::Stop,
            0x80 => DeviceState::Init,
            0x81 => DeviceState::Reset,
            other => DeviceState::Other(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for code in 0..=u8::MAX {
            assert_eq!(DeviceState::from_code(code).code(), code);
        }
        assert_eq!(DeviceState::from_code(0x81), DeviceState::Reset);
        assert_eq!(DeviceState::from_code(0x42), DeviceState::Other(0x42));
    }
}
