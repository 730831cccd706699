//! Device identity reported in discovery responses

use serde::{Deserialize, Serialize};
use std::fmt;

/// Vendor and model announced by a device answering discovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub vendor: String,
    pub model: String,
}

impl Identity {
    pub fn new(vendor: impl Into<String>, model: impl Into<String>) -> Self {
        Self { vendor: vendor.into(), model: model.into() }
    }

    /// Parse the comma separated `vendor,model` discovery payload.
    ///
    /// Trailing NULs and surrounding whitespace are ignored. A payload without a comma is
    /// taken as a vendor with an empty model.
    pub fn parse(payload: &[u8]) -> Self {
        let text = String::from_utf8_lossy(payload);
        let text = text.trim_end_matches('\0');
        let mut fields = text.splitn(3, ',');
        let vendor = fields.next().unwrap_or_default().trim().to_string();
        let model = fields.next().unwrap_or_default().trim().to_string();
        Self { vendor, model }
    }

    /// Encode as a discovery response payload.
    pub fn to_payload(&self) -> Vec<u8> {
        format!("{},{}", self.vendor, self.model).into_bytes()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.vendor, self.model)
    }
}
