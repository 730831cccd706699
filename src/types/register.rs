//! Register addressing

use serde::{Deserialize, Serialize};
use std::fmt;

/// An addressable `(address, subindex)` value on a remote device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RegisterKey {
    /// 16-bit register address
    pub address: u16,
    /// 8-bit subindex within the register
    pub subindex: u8,
}

impl RegisterKey {
    /// Create a register key
    pub const fn new(address: u16, subindex: u8) -> Self {
        Self { address, subindex }
    }
}

impl From<(u16, u8)> for RegisterKey {
    fn from((address, subindex): (u16, u8)) -> Self {
        Self { address, subindex }
    }
}

impl fmt::Display for RegisterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}/{}", self.address, self.subindex)
    }
}
