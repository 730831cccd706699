//! In-memory transport for exercising the arbiter without sockets
//!
//! [`MockTransport::pair`] returns the transport to hand to
//! [`Arbiter::with_transport`](crate::Arbiter::with_transport) and a [`MockNetwork`] that
//! plays the part of the devices: it sees every datagram the arbiter sends and injects
//! datagrams as if they arrived from arbitrary addresses.

#![cfg(any(test, feature = "test-utils"))]

use bytes::Bytes;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::packet::Packet;
use crate::transport::Transport;

/// Address the mock transport reports as its own.
pub const MOCK_LOCAL_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 7968);

/// One datagram handed to the mock transport.
#[derive(Debug, Clone)]
pub struct SentDatagram {
    pub bytes: Bytes,
    pub target: SocketAddr,
    /// Whether broadcast was enabled when the datagram was sent
    pub broadcast: bool,
}

impl SentDatagram {
    /// Decode the datagram; panics on malformed bytes since the arbiter only sends valid ones.
    pub fn packet(&self) -> Packet {
        Packet::decode(&self.bytes).expect("arbiter sent a malformed packet")
    }
}

#[derive(Debug, Default)]
struct MockState {
    broadcast: AtomicBool,
    fail_sends: AtomicBool,
    fail_recvs: AtomicBool,
    sent: AtomicUsize,
}

/// Transport half owned by the arbiter.
#[derive(Debug)]
pub struct MockTransport {
    inbound: mpsc::UnboundedReceiver<(Bytes, SocketAddr)>,
    outbound: mpsc::UnboundedSender<SentDatagram>,
    state: Arc<MockState>,
}

/// Network half driven by the test.
#[derive(Debug)]
pub struct MockNetwork {
    inject: mpsc::UnboundedSender<(Bytes, SocketAddr)>,
    sent: mpsc::UnboundedReceiver<SentDatagram>,
    state: Arc<MockState>,
}

/// Cloneable injector for responders running on other tasks.
#[derive(Debug, Clone)]
pub struct MockInjector {
    inject: mpsc::UnboundedSender<(Bytes, SocketAddr)>,
}

impl MockTransport {
    pub fn pair() -> (MockTransport, MockNetwork) {
        let (inject, inbound) = mpsc::unbounded_channel();
        let (outbound, sent) = mpsc::unbounded_channel();
        let state = Arc::new(MockState::default());
        (MockTransport { inbound, outbound, state: state.clone() }, MockNetwork { inject, sent, state })
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn send_to(&mut self, buf: &[u8], target: SocketAddr) -> io::Result<()> {
        if self.state.fail_sends.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::NetworkUnreachable, "mock send failure"));
        }
        let broadcast = self.state.broadcast.load(Ordering::Acquire);
        self.state.sent.fetch_add(1, Ordering::AcqRel);
        // The network half may have been dropped; datagrams then vanish like on a real wire
        let _ = self.outbound.send(SentDatagram { bytes: Bytes::copy_from_slice(buf), target, broadcast });
        Ok(())
    }

    async fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        if self.state.fail_recvs.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "mock receive failure"));
        }
        match self.inbound.recv().await {
            Some((bytes, from)) => {
                let len = bytes.len().min(buf.len());
                buf[..len].copy_from_slice(&bytes[..len]);
                Ok((len, from))
            }
            None => std::future::pending().await,
        }
    }

    fn set_broadcast(&mut self, enabled: bool) -> io::Result<()> {
        self.state.broadcast.store(enabled, Ordering::Release);
        Ok(())
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(MOCK_LOCAL_ADDR)
    }
}

impl MockInjector {
    /// Deliver raw bytes to the arbiter as if sent from `from`.
    pub fn inject(&self, from: SocketAddr, bytes: impl Into<Bytes>) {
        let _ = self.inject.send((bytes.into(), from));
    }

    /// Encode and deliver a packet.
    pub fn inject_packet(&self, from: SocketAddr, packet: &Packet) {
        self.inject(from, packet.encode().expect("test packet encodes"));
    }
}

impl MockNetwork {
    pub fn injector(&self) -> MockInjector {
        MockInjector { inject: self.inject.clone() }
    }

    /// Deliver raw bytes to the arbiter as if sent from `from`.
    pub fn inject(&self, from: SocketAddr, bytes: impl Into<Bytes>) {
        self.injector().inject(from, bytes);
    }

    /// Encode and deliver a packet.
    pub fn inject_packet(&self, from: SocketAddr, packet: &Packet) {
        self.injector().inject_packet(from, packet);
    }

    /// Next datagram the arbiter sends.
    pub async fn next_sent(&mut self) -> Option<SentDatagram> {
        self.sent.recv().await
    }

    /// A datagram already sent, if any.
    pub fn try_next_sent(&mut self) -> Option<SentDatagram> {
        self.sent.try_recv().ok()
    }

    /// Total datagrams handed to the transport.
    pub fn sent_count(&self) -> usize {
        self.state.sent.load(Ordering::Acquire)
    }

    /// Make every subsequent send fail.
    pub fn fail_sends(&self, fail: bool) {
        self.state.fail_sends.store(fail, Ordering::Release);
    }

    /// Make every subsequent receive fail immediately.
    pub fn fail_recvs(&self, fail: bool) {
        self.state.fail_recvs.store(fail, Ordering::Release);
    }

    /// Whether broadcast is currently enabled on the transport.
    pub fn broadcast_enabled(&self) -> bool {
        self.state.broadcast.load(Ordering::Acquire)
    }

    /// Answer every sent datagram with whatever `handler` returns, on a background task.
    pub fn serve<F>(mut self, mut handler: F) -> JoinHandle<()>
    where
        F: FnMut(SentDatagram) -> Vec<(SocketAddr, Packet)> + Send + 'static,
    {
        let injector = self.injector();
        tokio::spawn(async move {
            while let Some(sent) = self.next_sent().await {
                for (from, reply) in handler(sent) {
                    injector.inject_packet(from, &reply);
                }
            }
        })
    }
}

/// Install a test subscriber once; repeated calls are harmless.
#[cfg(test)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
