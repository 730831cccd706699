//! Core value types shared by the codec, the arbiter and the device façade.
//!
//! - [`TransactionId`] correlates a request with its response
//! - [`RegisterKey`] addresses one `(address, subindex)` register
//! - [`DataType`] and [`Value`] interpret register payloads
//! - [`Identity`] is the `vendor,model` pair a device reports on discovery
//! - [`DeviceState`] is the one-byte run state carried by StateChange packets

mod data_type;
mod identity;
mod register;
mod state;
mod transaction;

pub use data_type::{DataType, Value};
pub use identity::Identity;
pub use register::RegisterKey;
pub use state::DeviceState;
pub use transaction::TransactionId;
