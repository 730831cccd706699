//! Per-device façade over the arbiter.
//!
//! A [`Device`] is created by the arbiter the first time an address answers discovery and is
//! handed out as a cheap clone. Register operations build a packet, queue it with a TTL and
//! await the outcome the arbiter delivers to the device's inbox.
//!
//! ## Caching and accumulation
//!
//! Registers marked cacheable are served from the cache by [`Device::read_register`] without
//! touching the network; [`Device::refresh_register`] always transacts and refreshes the
//! cache. Accumulated registers are also cacheable: a background poller reads each one at
//! its interval, stores the value and appends it to a fixed-depth [`Accumulator`].
//!
//! [`Accumulator`]: crate::Accumulator

mod inbox;
mod poller;
mod registers;
mod transaction;

pub use transaction::{Outcome, PendingTransaction};

use parking_lot::Mutex;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use self::inbox::Inbox;
use self::poller::Poller;
use self::registers::{DueRead, Registers};
use crate::accumulator::Sample;
use crate::arbiter::{ArbiterHandle, Outbound, Reply};
use crate::config::AccumulateConfig;
use crate::packet::Packet;
use crate::stream::SampleStream;
use crate::types::{DataType, DeviceState, Identity, RegisterKey, TransactionId, Value};
use crate::{IcpError, Result};

struct DeviceInner {
    socket: SocketAddr,
    identity: Identity,
    handle: ArbiterHandle,
    inbox: Inbox,
    registers: Mutex<Registers>,
    poller: Mutex<Option<Poller>>,
}

/// One remote ICP endpoint.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    pub(crate) fn new(socket: SocketAddr, identity: Identity, handle: ArbiterHandle) -> Self {
        Self {
            inner: Arc::new(DeviceInner {
                socket,
                identity,
                handle,
                inbox: Inbox::default(),
                registers: Mutex::new(Registers::default()),
                poller: Mutex::new(None),
            }),
        }
    }

    /// IP address the device is keyed by.
    pub fn address(&self) -> IpAddr {
        self.inner.socket.ip()
    }

    /// Socket address requests are sent to.
    pub fn socket_addr(&self) -> SocketAddr {
        self.inner.socket
    }

    /// Vendor and model reported on discovery.
    pub fn identity(&self) -> &Identity {
        &self.inner.identity
    }

    /// Number of transactions awaiting an outcome.
    pub fn pending_transactions(&self) -> usize {
        self.inner.inbox.len()
    }

    /// Read a register.
    ///
    /// Cacheable registers are answered from the cache without a transaction and fail with
    /// [`IcpError::CacheMiss`] until a value has been cached.
    pub async fn read_register(
        &self,
        key: impl Into<RegisterKey>,
        data_type: DataType,
        ttl: Option<Duration>,
    ) -> Result<Value> {
        let key = key.into();
        let cached = self.inner.registers.lock().cached(key).map(|value| value.cloned());
        if let Some(cached) = cached {
            trace!(address = %self.address(), register = %key, hit = cached.is_some(), "Cached read");
            return cached.ok_or(IcpError::CacheMiss { register: key });
        }
        self.submit(Packet::register_read(key), data_type, ttl)?.value().await
    }

    /// Read a register from the device, refreshing the cache if the register is cacheable.
    pub async fn refresh_register(
        &self,
        key: impl Into<RegisterKey>,
        data_type: DataType,
        ttl: Option<Duration>,
    ) -> Result<Value> {
        let key = key.into();
        let value = self.submit(Packet::register_read(key), data_type, ttl)?.value().await?;
        self.inner.registers.lock().store(key, &value);
        Ok(value)
    }

    /// Write a register and return the echoed value, decoded as the written value's type.
    pub async fn write_register(
        &self,
        key: impl Into<RegisterKey>,
        value: impl Into<Value>,
        ttl: Option<Duration>,
    ) -> Result<Value> {
        let key = key.into();
        let value = value.into();
        debug!(address = %self.address(), register = %key, ?value, "Register write");
        self.submit(Packet::register_write(key, &value), value.data_type(), ttl)?.value().await
    }

    /// Queue a read without waiting for it.
    ///
    /// Fails with [`IcpError::NoIdentifiersAvailable`] instead of queueing behind an
    /// exhausted identifier pool.
    pub fn queue_read(
        &self,
        key: impl Into<RegisterKey>,
        data_type: DataType,
        ttl: Option<Duration>,
    ) -> Result<PendingTransaction> {
        let packet = Packet::register_read(key.into());
        let (outbound, pending) = self.prepare(packet, data_type, ttl)?;
        self.inner.handle.try_submit(outbound)?;
        Ok(pending)
    }

    /// Queue a write without waiting for it.
    pub fn queue_write(
        &self,
        key: impl Into<RegisterKey>,
        value: impl Into<Value>,
        ttl: Option<Duration>,
    ) -> Result<PendingTransaction> {
        let value = value.into();
        let packet = Packet::register_write(key.into(), &value);
        let (outbound, pending) = self.prepare(packet, value.data_type(), ttl)?;
        self.inner.handle.try_submit(outbound)?;
        Ok(pending)
    }

    /// Ask the device for its run state.
    pub async fn get_state(&self, ttl: Option<Duration>) -> Result<DeviceState> {
        let response = self.submit(Packet::state_query(), DataType::Raw, ttl)?.response().await?;
        response.state().ok_or_else(|| IcpError::type_conversion("state response carried no state byte"))
    }

    /// Request a run state change and return the state the device reports.
    pub async fn set_state(&self, state: DeviceState, ttl: Option<Duration>) -> Result<DeviceState> {
        debug!(address = %self.address(), ?state, "State change");
        let response = self.submit(Packet::state_change(state), DataType::Raw, ttl)?.response().await?;
        Ok(response.state().unwrap_or(state))
    }

    /// Mark a register cacheable.
    pub fn configure_cache(&self, key: impl Into<RegisterKey>) {
        let key = key.into();
        self.inner.registers.lock().mark_cacheable(key);
        debug!(address = %self.address(), register = %key, "Register cached");
    }

    /// Sample a register in the background. Accumulated registers are also cacheable.
    pub fn configure_accumulate(&self, key: impl Into<RegisterKey>, config: AccumulateConfig) -> Result<()> {
        config.validate()?;
        let key = key.into();
        debug!(address = %self.address(), register = %key, depth = config.depth, interval = ?config.interval, "Register accumulated");

        let mut registers = self.inner.registers.lock();
        registers.accumulate(key, config, Instant::now());

        let mut poller = self.inner.poller.lock();
        match poller.as_ref() {
            Some(running) if !running.is_stopped() => running.wake(),
            _ => *poller = Some(Poller::spawn(self.clone(), self.inner.handle.cancel.child_token())),
        }
        Ok(())
    }

    /// Remove caching and accumulation for a register.
    pub fn clear_config(&self, key: impl Into<RegisterKey>) {
        let key = key.into();
        let mut registers = self.inner.registers.lock();
        registers.clear(key);
        debug!(address = %self.address(), register = %key, "Register configuration cleared");

        if !registers.has_accumulators() {
            if let Some(poller) = self.inner.poller.lock().take() {
                poller.stop();
            }
        }
    }

    /// Cached value of a register, if any.
    pub fn cached(&self, key: impl Into<RegisterKey>) -> Option<Value> {
        self.inner.registers.lock().cached(key.into()).flatten().cloned()
    }

    /// Accumulated samples newer than `watermark`; `None` if the register is not accumulated.
    pub fn samples_since(&self, key: impl Into<RegisterKey>, watermark: Option<Instant>) -> Option<Vec<Sample>> {
        self.inner.registers.lock().samples_since(key.into(), watermark)
    }

    /// Stream of new accumulated samples, checked every `period`.
    ///
    /// Fails with [`IcpError::InvalidConfig`] for a zero period.
    pub fn sample_stream(&self, key: impl Into<RegisterKey>, period: Duration) -> Result<SampleStream> {
        if period.is_zero() {
            return Err(IcpError::invalid_config("sample stream period must be greater than zero"));
        }
        Ok(SampleStream::new(self.clone(), key.into(), period))
    }

    /// True while a background poller is running.
    pub fn is_polling(&self) -> bool {
        self.inner.poller.lock().as_ref().is_some_and(|poller| !poller.is_stopped())
    }

    fn prepare(
        &self,
        packet: Packet,
        data_type: DataType,
        ttl: Option<Duration>,
    ) -> Result<(Outbound, PendingTransaction)> {
        // Oversized payloads fail here rather than inside the loop
        packet.encode()?;

        let config = &self.inner.handle.config;
        let ttl = ttl.unwrap_or(config.default_ttl);
        let register = packet.register_key();
        let (tx, rx) = oneshot::channel();
        let outbound = Outbound {
            packet,
            to: self.inner.socket,
            broadcast: false,
            ttl,
            reply: Some(Reply { device: self.clone(), tx }),
        };
        let pending =
            PendingTransaction::new(self.address(), ttl, ttl + config.dispatch_grace, data_type, register, rx);
        Ok((outbound, pending))
    }

    fn submit(&self, packet: Packet, data_type: DataType, ttl: Option<Duration>) -> Result<PendingTransaction> {
        let (outbound, pending) = self.prepare(packet, data_type, ttl)?;
        self.inner.handle.submit(outbound)?;
        Ok(pending)
    }

    pub(crate) fn open(&self, id: TransactionId, tx: oneshot::Sender<Outcome>) {
        self.inner.inbox.open(id, tx);
    }

    pub(crate) fn deliver(&self, id: TransactionId, outcome: Outcome) -> bool {
        self.inner.inbox.deliver(id, outcome)
    }

    pub(crate) fn abandon(&self, id: TransactionId) {
        self.inner.inbox.abandon(id);
    }

    pub(crate) fn stop_polling(&self) {
        if let Some(poller) = self.inner.poller.lock().take() {
            poller.stop();
        }
    }

    pub(crate) fn take_due(&self, now: Instant) -> Vec<DueRead> {
        self.inner.registers.lock().take_due(now)
    }

    pub(crate) fn next_due(&self) -> Option<Instant> {
        self.inner.registers.lock().next_due()
    }

    /// Cancel the poller token if nothing is accumulated, under the register lock so a
    /// concurrent `configure_accumulate` either sees the cancelled token or is seen here.
    pub(crate) fn retire_poller_if_idle(&self, cancel: &CancellationToken) -> bool {
        let registers = self.inner.registers.lock();
        if registers.has_accumulators() {
            return false;
        }
        cancel.cancel();
        true
    }

    /// One poller read: transact, then record the value with the response's receive time.
    pub(crate) async fn sample(&self, read: DueRead) {
        let result = match self.submit(Packet::register_read(read.key), read.data_type, read.ttl) {
            Ok(pending) => pending.response().await.and_then(|response| {
                let value = response.register_value(read.key, read.data_type)?;
                Ok((response.meta.timestamp.unwrap_or_else(Instant::now), value))
            }),
            Err(e) => Err(e),
        };

        let sample = match result {
            Ok(sample) => Some(sample),
            Err(e) => {
                debug!(address = %self.address(), register = %read.key, error = %e, "Accumulator read failed");
                None
            }
        };
        self.inner.registers.lock().finish_read(read.key, sample);
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("socket", &self.inner.socket)
            .field("identity", &self.inner.identity)
            .field("pending", &self.inner.inbox.len())
            .finish()
    }
}
