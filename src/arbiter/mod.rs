//! The Arbiter: one loop multiplexing the ICP socket for every device.
//!
//! ```rust,no_run
//! use upel_icp::{Arbiter, ArbiterConfig, DataType, RegisterKey};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> upel_icp::Result<()> {
//!     let config = ArbiterConfig::default();
//!     let arbiter = Arbiter::start(config.clone()).await?;
//!     let mut found = arbiter.device_events();
//!     arbiter.discover(config.broadcast_address)?;
//!
//!     if let Some(event) = found.next().await {
//!         let device = arbiter.device(event.address).expect("just discovered");
//!         let volts = device.read_register(RegisterKey::new(0x2122, 1), DataType::Float, None).await?;
//!         println!("{} reads {:?}", event.identity, volts);
//!     }
//!
//!     arbiter.shutdown().await;
//!     Ok(())
//! }
//! ```

mod handle;
mod service;
mod stats;


pub(crate) use handle::{ArbiterHandle, Outbound, Reply};
pub use stats::ArbiterStats;

use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use self::service::Service;
use self::stats::Counters;
use crate::config::ArbiterConfig;
use crate::device::Device;
use crate::packet::Packet;
use crate::stream::DeviceEvents;
use crate::transport::{Transport, UdpTransport};
use crate::types::Identity;
use crate::{IcpError, Result};

/// Discovered devices keyed by IP address.
pub(crate) type Registry = Arc<RwLock<HashMap<IpAddr, Device>>>;

/// Capacity of the device-found event channel.
const EVENT_CAPACITY: usize = 64;

/// Published once for every newly discovered address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFound {
    pub address: IpAddr,
    pub identity: Identity,
}

/// Owner of the arbiter loop.
///
/// Dropping the arbiter stops the loop; [`Arbiter::shutdown`] also waits for it to finish.
/// Outstanding transactions complete with [`IcpError::ArbiterClosed`].
pub struct Arbiter {
    handle: ArbiterHandle,
    registry: Registry,
    events: broadcast::Sender<DeviceFound>,
    local_addr: SocketAddr,
    task: Option<JoinHandle<()>>,
}

impl Arbiter {
    /// Bind the configured UDP socket and start the loop.
    pub async fn start(config: ArbiterConfig) -> Result<Self> {
        config.validate()?;
        let transport = UdpTransport::bind(config.bind_socket()).await?;
        Self::with_transport(transport, config)
    }

    /// Start the loop over an existing transport.
    pub fn with_transport<T: Transport>(transport: T, config: ArbiterConfig) -> Result<Self> {
        config.validate()?;
        let local_addr = transport.local_addr().map_err(|e| IcpError::transport("local_addr", e))?;

        let config = Arc::new(config);
        let cancel = CancellationToken::new();
        let counters = Arc::new(Counters::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let registry: Registry = Arc::new(RwLock::new(HashMap::new()));
        let handle = ArbiterHandle::new(tx, counters.clone(), config.clone(), cancel.clone());

        let service = Service {
            transport,
            config,
            outbound: rx,
            handle: handle.clone(),
            registry: registry.clone(),
            events: events.clone(),
            counters,
            cancel,
        };
        let task = tokio::spawn(service.run());

        info!(%local_addr, "Arbiter started");
        Ok(Self { handle, registry, events, local_addr, task: Some(task) })
    }

    /// Broadcast a discovery request to `broadcast_address`.
    pub fn discover(&self, broadcast_address: IpAddr) -> Result<()> {
        debug!(%broadcast_address, "Queueing discovery broadcast");
        self.send_discovery(broadcast_address, true)
    }

    /// Send a unicast discovery request to a single address.
    pub fn probe(&self, address: IpAddr) -> Result<()> {
        debug!(%address, "Queueing discovery probe");
        self.send_discovery(address, false)
    }

    fn send_discovery(&self, address: IpAddr, broadcast: bool) -> Result<()> {
        let config = &self.handle.config;
        self.handle.submit(Outbound::unacknowledged(
            Packet::discovery(),
            config.device_socket(address),
            broadcast,
            config.default_ttl,
        ))
    }

    /// The device discovered at `address`.
    pub fn device(&self, address: IpAddr) -> Option<Device> {
        self.registry.read().get(&address).cloned()
    }

    /// Every discovered device.
    pub fn devices(&self) -> Vec<Device> {
        self.registry.read().values().cloned().collect()
    }

    /// Identity of every discovered device by address.
    pub fn discovered_devices(&self) -> HashMap<IpAddr, Identity> {
        self.registry.read().iter().map(|(address, device)| (*address, device.identity().clone())).collect()
    }

    /// Stream of newly discovered devices, starting from now.
    pub fn device_events(&self) -> DeviceEvents {
        DeviceEvents::new(self.events.subscribe())
    }

    /// Remove a device and stop its background polling.
    ///
    /// Transactions already in flight for the device still complete. A later discovery
    /// response from the same address creates a fresh device.
    pub fn forget(&self, address: IpAddr) -> Option<Device> {
        let device = self.registry.write().remove(&address)?;
        device.stop_polling();
        info!(%address, "Forgot device");
        Some(device)
    }

    /// Current counters and gauges.
    pub fn stats(&self) -> ArbiterStats {
        self.handle.counters.snapshot()
    }

    /// Address the transport is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &ArbiterConfig {
        &self.handle.config
    }

    /// True until the loop has been told to stop.
    pub fn is_running(&self) -> bool {
        !self.handle.cancel.is_cancelled()
    }

    /// Stop the loop and wait for it to release the transport.
    pub async fn shutdown(mut self) {
        self.handle.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Arbiter task failed");
            }
        }
    }
}

impl Drop for Arbiter {
    fn drop(&mut self) {
        self.handle.cancel.cancel();
    }
}

impl std::fmt::Debug for Arbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arbiter")
            .field("local_addr", &self.local_addr)
            .field("devices", &self.registry.read().len())
            .field("running", &self.is_running())
            .finish()
    }
}
