//! Arbiter and accumulator configuration

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::types::DataType;
use crate::{IcpError, Result};

/// Well-known ICP UDP port.
pub const DEFAULT_PORT: u16 = 7968;

/// Runtime settings for an [`Arbiter`](crate::Arbiter).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbiterConfig {
    /// Local interface to bind
    pub bind_address: IpAddr,
    /// Local port to bind; `0` picks an ephemeral port
    pub port: u16,
    /// Port devices listen on
    pub remote_port: u16,
    /// Address used for discovery broadcasts
    pub broadcast_address: IpAddr,
    /// TTL for requests that do not name one
    pub default_ttl: Duration,
    /// Longest the loop waits on the socket before servicing the queue and timers
    pub poll_interval: Duration,
    /// Extra time a caller waits past its TTL for the loop's timeout delivery
    pub dispatch_grace: Duration,
    /// Receive buffer size; datagrams longer than this are truncated and dropped
    pub recv_buffer: usize,
    /// Broadcast discovery at this interval when set
    pub rediscovery_interval: Option<Duration>,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            remote_port: DEFAULT_PORT,
            broadcast_address: IpAddr::V4(Ipv4Addr::BROADCAST),
            default_ttl: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
            dispatch_grace: Duration::from_secs(1),
            recv_buffer: 4096,
            rediscovery_interval: None,
        }
    }
}

impl ArbiterConfig {
    pub fn with_bind_address(mut self, address: IpAddr) -> Self {
        self.bind_address = address;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_remote_port(mut self, port: u16) -> Self {
        self.remote_port = port;
        self
    }

    pub fn with_broadcast_address(mut self, address: IpAddr) -> Self {
        self.broadcast_address = address;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_dispatch_grace(mut self, grace: Duration) -> Self {
        self.dispatch_grace = grace;
        self
    }

    pub fn with_recv_buffer(mut self, size: usize) -> Self {
        self.recv_buffer = size;
        self
    }

    pub fn with_rediscovery_interval(mut self, interval: Duration) -> Self {
        self.rediscovery_interval = Some(interval);
        self
    }

    /// Local socket address to bind.
    pub fn bind_socket(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    /// Socket address for a device at `address`.
    pub fn device_socket(&self, address: IpAddr) -> SocketAddr {
        SocketAddr::new(address, self.remote_port)
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.remote_port == 0 {
            return Err(IcpError::invalid_config("remote_port must be non-zero"));
        }
        if self.default_ttl.is_zero() {
            return Err(IcpError::invalid_config("default_ttl must be positive"));
        }
        if self.poll_interval.is_zero() {
            return Err(IcpError::invalid_config("poll_interval must be positive"));
        }
        if self.recv_buffer < crate::packet::HEADER_LEN + crate::packet::MAX_PAYLOAD {
            return Err(IcpError::invalid_config(format!(
                "recv_buffer of {} cannot hold a full packet",
                self.recv_buffer
            )));
        }
        if self.rediscovery_interval.is_some_and(|interval| interval.is_zero()) {
            return Err(IcpError::invalid_config("rediscovery_interval must be positive"));
        }
        Ok(())
    }
}

/// Background sampling settings for one register.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccumulateConfig {
    /// Samples kept; must be at least 1
    pub depth: usize,
    /// Time between reads
    pub interval: Duration,
    /// Type each sample is decoded as
    pub data_type: DataType,
    /// TTL for each read; the arbiter default when `None`
    pub ttl: Option<Duration>,
}

impl AccumulateConfig {
    pub fn new(depth: usize, interval: Duration, data_type: DataType) -> Self {
        Self { depth, interval, data_type, ttl: None }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.depth == 0 {
            return Err(IcpError::invalid_config("accumulator depth must be at least 1"));
        }
        if self.interval.is_zero() {
            return Err(IcpError::invalid_config("accumulator interval must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = ArbiterConfig::default();
        assert_eq!(config.port, 7968);
        assert_eq!(config.remote_port, 7968);
        assert_eq!(config.default_ttl, Duration::from_secs(10));
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.bind_socket().to_string(), "0.0.0.0:7968");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation_rejects_unusable_values() {
        assert!(ArbiterConfig::default().with_poll_interval(Duration::ZERO).validate().is_err());
        assert!(ArbiterConfig::default().with_recv_buffer(64).validate().is_err());
        assert!(ArbiterConfig::default().with_remote_port(0).validate().is_err());
        assert!(ArbiterConfig::default().with_rediscovery_interval(Duration::ZERO).validate().is_err());
        assert!(ArbiterConfig::default().with_port(0).validate().is_ok());
    }

    #[test]
    fn accumulate_depth_must_be_positive() {
        let config = AccumulateConfig::new(0, Duration::from_secs(1), DataType::Float);
        assert!(matches!(config.validate(), Err(IcpError::InvalidConfig { .. })));
        assert!(AccumulateConfig::new(1, Duration::from_secs(1), DataType::Float).validate().is_ok());
    }
}
