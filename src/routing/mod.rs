//! Transaction identifier allocation and correlation.

mod pool;
mod table;

pub use pool::{IdentifierPool, Lease};
pub use table::RoutingTable;
