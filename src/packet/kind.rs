//! Packet type nibble

use serde::{Deserialize, Serialize};

/// Closed set of packet kinds, decided once at decode time from the type nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketKind {
    StateChange,
    Error,
    Heartbeat,
    FirmwareDownload,
    RegisterRead,
    RegisterWrite,
    ProcessDataRead,
    Discovery,
    /// A type nibble with no assigned meaning; kept so it can be logged.
    ///
    /// Produced by decoding. An `Unknown` holding an assigned nibble is not canonical;
    /// [`PacketKind::normalized`] maps it to the named kind.
    Unknown(u8),
}

impl PacketKind {
    /// Wire nibble of this kind
    pub const fn nibble(self) -> u8 {
        match self {
            PacketKind::StateChange => 0x0,
            PacketKind::Error => 0x1,
            PacketKind::Heartbeat => 0x2,
            PacketKind::FirmwareDownload => 0x4,
            PacketKind::RegisterRead => 0x8,
            PacketKind::RegisterWrite => 0x9,
            PacketKind::ProcessDataRead => 0xA,
            PacketKind::Discovery => 0xF,
            PacketKind::Unknown(nibble) => nibble & 0x0F,
        }
    }

    /// Classify the low nibble of a header byte.
    pub const fn from_nibble(nibble: u8) -> Self {
        match nibble & 0x0F {
            0x0 => PacketKind::StateChange,
            0x1 => PacketKind::Error,
            0x2 => PacketKind::Heartbeat,
            0x4 => PacketKind::FirmwareDownload,
            0x8 => PacketKind::RegisterRead,
            0x9 => PacketKind::RegisterWrite,
            0xA => PacketKind::ProcessDataRead,
            0xF => PacketKind::Discovery,
            other => PacketKind::Unknown(other),
        }
    }

    /// The kind this value decodes back to once encoded.
    pub const fn normalized(self) -> Self {
        Self::from_nibble(self.nibble())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_nibble_classifies() {
        for nibble in 0..16u8 {
            assert_eq!(PacketKind::from_nibble(nibble).nibble(), nibble);
        }
        assert_eq!(PacketKind::from_nibble(0x3), PacketKind::Unknown(0x3));
        assert_eq!(PacketKind::from_nibble(0xF), PacketKind::Discovery);
    }

    #[test]
    fn unknown_with_assigned_nibble_normalizes() {
        assert_eq!(PacketKind::Unknown(0x8).normalized(), PacketKind::RegisterRead);
        assert_eq!(PacketKind::Unknown(0x13).normalized(), PacketKind::Unknown(0x3));
        assert_eq!(PacketKind::Discovery.normalized(), PacketKind::Discovery);
    }
}
