//! Datagram transport seam

use std::io;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tracing::debug;

use crate::{IcpError, Result};

/// Datagram transport owned by the arbiter loop.
///
/// The arbiter is the only user of a transport, so methods take `&mut self`. The UDP
/// implementation is [`UdpTransport`]; tests substitute an in-memory double.
#[async_trait::async_trait]
pub trait Transport: Send + 'static {
    /// Send one datagram.
    async fn send_to(&mut self, buf: &[u8], target: SocketAddr) -> io::Result<()>;

    /// Receive one datagram, returning its length and sender.
    ///
    /// Must be cancel-safe: the arbiter races it against its other wake-up sources.
    async fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    /// Enable or disable sending to broadcast addresses.
    fn set_broadcast(&mut self, enabled: bool) -> io::Result<()>;

    /// Local address the transport is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// [`Transport`] over a tokio UDP socket.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Bind a UDP socket; failure is reported as [`IcpError::Bind`].
    pub async fn bind(address: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(address).await.map_err(|source| IcpError::Bind { address, source })?;
        debug!(local = ?socket.local_addr().ok(), "ICP socket bound");
        Ok(Self { socket })
    }

    /// Wrap an already bound socket.
    pub fn from_socket(socket: UdpSocket) -> Self {
        Self { socket }
    }
}

#[async_trait::async_trait]
impl Transport for UdpTransport {
    async fn send_to(&mut self, buf: &[u8], target: SocketAddr) -> io::Result<()> {
        let sent = self.socket.send_to(buf, target).await?;
        if sent != buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short send: {} of {} bytes", sent, buf.len()),
            ));
        }
        Ok(())
    }

    async fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf).await
    }

    fn set_broadcast(&mut self, enabled: bool) -> io::Result<()> {
        self.socket.set_broadcast(enabled)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}
