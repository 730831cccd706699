//! Producer side of the arbiter's outbound queue

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::stats::Counters;
use crate::config::ArbiterConfig;
use crate::device::{Device, Outcome};
use crate::packet::Packet;
use crate::{IcpError, Result};

/// Where to deliver the outcome of a request that expects a response.
pub(crate) struct Reply {
    pub device: Device,
    pub tx: oneshot::Sender<Outcome>,
}

/// A packet waiting for the arbiter to send it.
pub(crate) struct Outbound {
    pub packet: Packet,
    pub to: SocketAddr,
    pub broadcast: bool,
    pub ttl: Duration,
    pub reply: Option<Reply>,
}

impl Outbound {
    /// Zero-identifier packet with no response expected.
    pub fn unacknowledged(packet: Packet, to: SocketAddr, broadcast: bool, ttl: Duration) -> Self {
        Self { packet, to, broadcast, ttl, reply: None }
    }
}

/// Cloneable handle used by devices and the public [`Arbiter`](super::Arbiter) to reach the loop.
#[derive(Clone)]
pub(crate) struct ArbiterHandle {
    tx: mpsc::UnboundedSender<Outbound>,
    pub counters: Arc<Counters>,
    pub config: Arc<ArbiterConfig>,
    pub cancel: CancellationToken,
}

impl ArbiterHandle {
    pub fn new(
        tx: mpsc::UnboundedSender<Outbound>,
        counters: Arc<Counters>,
        config: Arc<ArbiterConfig>,
        cancel: CancellationToken,
    ) -> Self {
        Self { tx, counters, config, cancel }
    }

    /// Queue a packet. Requests that expect a response wait in the queue while the
    /// identifier pool is exhausted.
    pub fn submit(&self, outbound: Outbound) -> Result<()> {
        if outbound.reply.is_some() {
            self.counters.queued.fetch_add(1, Ordering::AcqRel);
        }
        self.enqueue(outbound)
    }

    /// Queue a request only if an identifier is free for it once everything already
    /// queued has been served.
    pub fn try_submit(&self, outbound: Outbound) -> Result<()> {
        if outbound.reply.is_some() {
            let queued = self.counters.queued.fetch_add(1, Ordering::AcqRel);
            if queued >= self.counters.free.load(Ordering::Acquire) {
                self.counters.queued.fetch_sub(1, Ordering::AcqRel);
                return Err(IcpError::NoIdentifiersAvailable);
            }
        }
        self.enqueue(outbound)
    }

    fn enqueue(&self, outbound: Outbound) -> Result<()> {
        let expects_reply = outbound.reply.is_some();
        if self.cancel.is_cancelled() || self.tx.send(outbound).is_err() {
            if expects_reply {
                self.counters.queued.fetch_sub(1, Ordering::AcqRel);
            }
            return Err(IcpError::ArbiterClosed);
        }
        Ok(())
    }
}

impl std::fmt::Debug for ArbiterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArbiterHandle").field("closed", &self.cancel.is_cancelled()).finish()
    }
}
