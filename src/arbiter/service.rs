//! The arbiter loop
//!
//! One task owns the transport, the outbound queue and the routing table. Each iteration
//! runs three phases in order:
//!
//! 1. wait on the socket, bounded by the poll interval and woken early by new outbound
//!    requests or the stop signal, then handle what arrived
//! 2. send every queued packet the identifier pool can cover
//! 3. sweep expired transactions and deliver their timeouts

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::handle::{ArbiterHandle, Outbound, Reply};
use super::stats::Counters;
use super::{DeviceFound, Registry};
use crate::config::ArbiterConfig;
use crate::device::{Device, Outcome};
use crate::packet::{Packet, PacketKind};
use crate::routing::RoutingTable;
use crate::transport::Transport;
use crate::types::Identity;

/// Back-off ceiling exponent for repeated socket errors: 50ms * 2^5 = 1.6s.
const MAX_BACKOFF_SHIFT: u32 = 5;

enum Wake {
    Datagram(std::io::Result<(usize, SocketAddr)>),
    Outbound(Outbound),
    Tick,
}

pub(crate) struct Service<T> {
    pub transport: T,
    pub config: Arc<ArbiterConfig>,
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
    pub handle: ArbiterHandle,
    pub registry: Registry,
    pub events: broadcast::Sender<DeviceFound>,
    pub counters: Arc<Counters>,
    pub cancel: CancellationToken,
}

struct State {
    pending: VecDeque<Outbound>,
    table: RoutingTable<Device>,
    recv_buf: Vec<u8>,
    error_count: u32,
    next_rediscovery: Option<Instant>,
}

impl<T: Transport> Service<T> {
    pub async fn run(mut self) {
        info!(poll_interval = ?self.config.poll_interval, "Arbiter loop started");

        let mut state = State {
            pending: VecDeque::new(),
            table: RoutingTable::new(),
            recv_buf: vec![0u8; self.config.recv_buffer],
            error_count: 0,
            next_rediscovery: self.config.rediscovery_interval.map(|interval| Instant::now() + interval),
        };

        loop {
            let wake = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = self.transport.recv_from(&mut state.recv_buf) => Wake::Datagram(result),
                Some(outbound) = self.outbound.recv() => Wake::Outbound(outbound),
                _ = tokio::time::sleep(self.config.poll_interval) => Wake::Tick,
            };

            // Phase 1: socket service
            match wake {
                Wake::Datagram(Ok((len, from))) => {
                    state.error_count = 0;
                    let received_at = Instant::now();
                    match Packet::decode(&state.recv_buf[..len]) {
                        Ok(packet) => self.handle_packet(&mut state, packet, from, received_at),
                        Err(e) => {
                            Counters::bump(&self.counters.malformed);
                            warn!(%from, len, error = %e, "Dropping malformed datagram");
                        }
                    }
                }
                Wake::Datagram(Err(e)) => {
                    state.error_count += 1;
                    error!(count = state.error_count, error = %e, "Socket receive error");

                    // Exponential backoff: 50ms, 100ms, 200ms, ... never longer than one poll
                    // interval so queued requests and timeouts keep moving
                    let backoff = Duration::from_millis(50 * (1 << state.error_count.min(MAX_BACKOFF_SHIFT)))
                        .min(self.config.poll_interval);
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Wake::Outbound(outbound) => state.pending.push_back(outbound),
                Wake::Tick => {}
            }

            // Phase 2: queue service
            while let Ok(outbound) = self.outbound.try_recv() {
                state.pending.push_back(outbound);
            }
            if state.next_rediscovery.is_some_and(|due| due <= Instant::now()) {
                self.queue_rediscovery(&mut state);
            }
            self.flush_pending(&mut state).await;

            // Phase 3: expiry service
            self.sweep(&mut state, Instant::now());
        }

        self.shutdown(state);
    }

    fn handle_packet(&self, state: &mut State, mut packet: Packet, from: SocketAddr, received_at: Instant) {
        packet.meta.source = Some(from);
        packet.meta.timestamp = Some(received_at);
        Counters::bump(&self.counters.received);
        trace!(%from, kind = ?packet.kind, id = %packet.transaction_id, len = packet.payload.len(), "RX");

        if packet.kind == PacketKind::Discovery {
            if packet.is_response() {
                self.handle_discovery(&packet, from);
            } else {
                trace!(%from, "Ignoring discovery request");
            }
            return;
        }

        let id = packet.transaction_id;
        let bound_to = state.table.peek(id).map(Device::address);
        if bound_to != Some(from.ip()) {
            Counters::bump(&self.counters.unresolved);
            warn!(%from, id = %id, kind = ?packet.kind, bound_to = ?bound_to, "Dropping response with no matching transaction");
            return;
        }

        if let Some(device) = state.table.resolve(id) {
            self.publish_free(state);
            debug!(%from, id = %id, kind = ?packet.kind, "Transaction completed");
            if !device.deliver(id, Outcome::from_response(packet)) {
                debug!(%from, id = %id, "Caller stopped waiting before the response arrived");
            }
        }
    }

    fn handle_discovery(&self, packet: &Packet, from: SocketAddr) {
        let address = from.ip();
        let identity = Identity::parse(&packet.payload);

        {
            let mut registry = self.registry.write();
            if registry.contains_key(&address) {
                trace!(%address, "Discovery response from known device");
                return;
            }
            registry.insert(address, Device::new(from, identity.clone(), self.handle.clone()));
        }

        info!(%address, vendor = %identity.vendor, model = %identity.model, "Discovered device");
        // No subscribers is fine
        let _ = self.events.send(DeviceFound { address, identity });
    }

    fn queue_rediscovery(&self, state: &mut State) {
        let Some(interval) = self.config.rediscovery_interval else {
            state.next_rediscovery = None;
            return;
        };
        debug!(broadcast = %self.config.broadcast_address, "Periodic discovery");
        let target = self.config.device_socket(self.config.broadcast_address);
        state.pending.push_back(Outbound::unacknowledged(
            Packet::discovery(),
            target,
            true,
            self.config.default_ttl,
        ));
        state.next_rediscovery = Some(Instant::now() + interval);
    }

    /// Send every queued packet that can be sent; requests that need an identifier stay
    /// queued, in order, while the pool is empty.
    async fn flush_pending(&mut self, state: &mut State) {
        let mut held = VecDeque::new();

        while let Some(outbound) = state.pending.pop_front() {
            if outbound.reply.is_some() && state.table.available() == 0 {
                held.push_back(outbound);
                continue;
            }
            self.dispatch(state, outbound).await;
        }

        if !held.is_empty() {
            trace!(held = held.len(), "Identifier pool exhausted, holding requests");
        }
        state.pending = held;
    }

    async fn dispatch(&mut self, state: &mut State, outbound: Outbound) {
        let Outbound { mut packet, to, broadcast, ttl, reply } = outbound;

        let mut bound = None;
        if let Some(Reply { device, tx }) = reply {
            match state.table.bind(device.clone(), ttl) {
                Ok(id) => {
                    packet.transaction_id = id;
                    device.open(id, tx);
                    bound = Some((id, device));
                }
                Err(e) => {
                    // Caller observes the closed slot
                    error!(error = %e, "Failed to bind identifier for queued request");
                }
            }
            self.publish_free(state);
            self.counters.queued.fetch_sub(1, Ordering::AcqRel);
            if bound.is_none() {
                return;
            }
        }

        packet.meta.destination = Some(to);
        packet.meta.timestamp = Some(Instant::now());

        let wire = match packet.encode() {
            Ok(wire) => wire,
            Err(e) => {
                error!(%to, kind = ?packet.kind, error = %e, "Failed to encode outbound packet");
                if let Some((id, device)) = bound {
                    state.table.resolve(id);
                    self.publish_free(state);
                    device.abandon(id);
                }
                return;
            }
        };

        if broadcast {
            if let Err(e) = self.transport.set_broadcast(true) {
                warn!(error = %e, "Failed to enable broadcast");
            }
        }

        match self.transport.send_to(&wire, to).await {
            Ok(()) => {
                Counters::bump(&self.counters.sent);
                debug!(%to, kind = ?packet.kind, id = %packet.transaction_id, len = wire.len(), "TX");
            }
            Err(e) => {
                // Bound requests stay in the table and time out
                Counters::bump(&self.counters.send_errors);
                warn!(%to, kind = ?packet.kind, id = %packet.transaction_id, error = %e, "Send failed");
            }
        }

        if broadcast {
            if let Err(e) = self.transport.set_broadcast(false) {
                warn!(error = %e, "Failed to disable broadcast");
            }
        }
    }

    fn sweep(&self, state: &mut State, now: Instant) {
        let expired = state.table.sweep_expired(now);
        if expired.is_empty() {
            return;
        }
        self.publish_free(state);

        for (id, device) in expired {
            Counters::bump(&self.counters.timed_out);
            debug!(address = %device.address(), id = %id, "Transaction timed out");
            device.deliver(id, Outcome::TimedOut(id));
        }
    }

    fn publish_free(&self, state: &State) {
        self.counters.free.store(state.table.available(), Ordering::Release);
    }

    fn shutdown(mut self, mut state: State) {
        self.outbound.close();
        while let Ok(outbound) = self.outbound.try_recv() {
            state.pending.push_back(outbound);
        }

        let queued = state.pending.len();
        state.pending.clear();
        self.counters.queued.store(0, Ordering::Release);

        let abandoned = state.table.drain();
        self.publish_free(&state);
        let in_flight = abandoned.len();
        for (id, device) in abandoned {
            device.abandon(id);
        }

        for device in self.registry.read().values() {
            device.stop_polling();
        }

        info!(queued, in_flight, "Arbiter loop stopped");
    }
}
