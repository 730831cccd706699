//! UPEL Instrument Control Protocol engine.
//!
//! ICP is a small binary request/response protocol over UDP used by UPEL laboratory
//! instruments. This crate provides the pieces a controller needs to talk to them:
//!
//! - **Packet codec**: the 8-byte `"UPEL"` header and payload, with every packet kind
//!   decided once at decode time
//! - **Arbiter**: a single tokio task that owns the socket, assigns transaction
//!   identifiers, matches responses to requests and times out the ones that never answer
//! - **Device**: a per-instrument façade with typed register reads and writes, a
//!   register cache and background sampling into fixed-depth accumulators
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use upel_icp::{AccumulateConfig, Arbiter, ArbiterConfig, DataType, RegisterKey};
//!
//! #[tokio::main]
//! async fn main() -> upel_icp::Result<()> {
//!     let arbiter = Arbiter::start(ArbiterConfig::default()).await?;
//!     arbiter.probe("192.168.1.20".parse().unwrap())?;
//!     tokio::time::sleep(Duration::from_millis(500)).await;
//!
//!     if let Some(device) = arbiter.device("192.168.1.20".parse().unwrap()) {
//!         let key = RegisterKey::new(0x2122, 1);
//!         let value = device.refresh_register(key, DataType::Float, None).await?;
//!         println!("{}: {:?}", device.identity(), value);
//!
//!         device.configure_accumulate(key, AccumulateConfig::new(100, Duration::from_millis(250), DataType::Float))?;
//!     }
//!
//!     arbiter.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Errors
//!
//! Everything surfaced to callers is an [`IcpError`]. Problems inside the arbiter loop,
//! such as malformed datagrams or responses nobody is waiting for, are logged through
//! `tracing` and counted in [`ArbiterStats`].

mod accumulator;
pub mod arbiter;
pub mod config;
pub mod device;
mod error;
pub mod packet;
pub mod routing;
pub mod stream;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod transport;
pub mod types;

pub use accumulator::{Accumulator, Sample};
pub use arbiter::{Arbiter, ArbiterStats, DeviceFound};
pub use config::{AccumulateConfig, ArbiterConfig, DEFAULT_PORT};
pub use device::{Device, Outcome, PendingTransaction};
pub use error::*;
pub use packet::{ErrorReport, Packet, PacketKind};
pub use stream::{DeviceEvents, SampleStream};
pub use transport::{Transport, UdpTransport};
pub use types::*;
