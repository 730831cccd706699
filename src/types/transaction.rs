//! Transaction identifiers

use serde::{Deserialize, Serialize};
use std::fmt;

/// One-byte correlation value binding a request to its eventual response.
///
/// Identifier `0` is reserved for packets that expect no response (discovery and other
/// broadcasts); usable identifiers are `1..=254`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId(u8);

impl TransactionId {
    /// The reserved "no response expected" identifier.
    pub const NONE: TransactionId = TransactionId(0);

    /// Lowest usable identifier.
    pub const MIN: u8 = 1;

    /// Highest usable identifier.
    pub const MAX: u8 = 254;

    /// Number of identifiers available for correlation.
    pub const USABLE: usize = (Self::MAX - Self::MIN + 1) as usize;

    /// Create a usable identifier, rejecting `0` and `255`.
    pub const fn new(raw: u8) -> Option<Self> {
        if raw >= Self::MIN && raw <= Self::MAX { Some(TransactionId(raw)) } else { None }
    }

    /// Wrap a raw header byte without validation.
    pub const fn from_raw(raw: u8) -> Self {
        TransactionId(raw)
    }

    /// The raw header byte.
    pub const fn get(self) -> u8 {
        self.0
    }

    /// True for the reserved no-response identifier.
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Iterate over every usable identifier in ascending order.
    pub fn usable() -> impl Iterator<Item = TransactionId> {
        (Self::MIN..=Self::MAX).map(TransactionId)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
