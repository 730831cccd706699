//! Error types for the ICP engine.
//!
//! Every failure surfaced to a caller of the [`Device`](crate::Device) façade or the
//! [`Arbiter`](crate::Arbiter) handle is an [`IcpError`]. Failures that happen inside the
//! arbiter loop (bad datagrams, transient socket errors) are logged and counted there and
//! never reach a caller.
//!
//! ## Error Categories
//!
//! - **Wire Errors**: malformed datagrams and oversized payloads
//! - **Transaction Errors**: identifier exhaustion, timeouts, remote error replies
//! - **Lifecycle Errors**: bind failures at start, a stopped arbiter
//! - **Value Errors**: register payloads that do not match the requested data type
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use upel_icp::IcpError;
//!
//! let error = IcpError::NoIdentifiersAvailable;
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use thiserror::Error;

use crate::types::{RegisterKey, TransactionId};

/// Result type alias for ICP operations.
pub type Result<T, E = IcpError> = std::result::Result<T, E>;

/// Structural problem found while decoding a datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeFault {
    /// Fewer bytes than the fixed header.
    TooShort { len: usize },
    /// The first four bytes are not `"UPEL"`.
    BadMagic { found: [u8; 4] },
    /// The declared payload length runs past the end of the buffer.
    Truncated { declared: usize, available: usize },
}

impl std::fmt::Display for DecodeFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeFault::TooShort { len } => write!(f, "{} bytes is shorter than the header", len),
            DecodeFault::BadMagic { found } => write!(f, "bad magic {:02x?}", found),
            DecodeFault::Truncated { declared, available } => {
                write!(f, "declared payload of {} bytes, only {} available", declared, available)
            }
        }
    }
}

/// Main error type for ICP operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum IcpError {
    #[error("Malformed packet: {fault}")]
    MalformedPacket { fault: DecodeFault },

    #[error("Payload too large: {size} bytes exceeds maximum {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("No transaction identifiers available")]
    NoIdentifiersAvailable,

    #[error("Device {address} did not answer transaction {transaction_id} within {ttl:?}")]
    DeviceTimeout { address: IpAddr, transaction_id: TransactionId, ttl: Duration },

    #[error("Device {address} returned error {code:#010x}: {message}")]
    DeviceError { address: IpAddr, code: u32, message: String },

    #[error("Register {register} is cacheable but holds no value yet")]
    CacheMiss { register: RegisterKey },

    #[error("Type conversion error: {details}")]
    TypeConversion { details: String },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Failed to bind ICP socket on {address}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Transport error during {operation}")]
    Transport {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Arbiter is not running")]
    ArbiterClosed,
}

impl IcpError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            IcpError::NoIdentifiersAvailable => true,
            IcpError::DeviceTimeout { .. } => true,
            IcpError::CacheMiss { .. } => true,
            IcpError::Transport { .. } => true,
            IcpError::MalformedPacket { .. } => false,
            IcpError::PayloadTooLarge { .. } => false,
            IcpError::DeviceError { .. } => false,
            IcpError::TypeConversion { .. } => false,
            IcpError::InvalidConfig { .. } => false,
            IcpError::Bind { .. } => false,
            IcpError::ArbiterClosed => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            IcpError::MalformedPacket { .. } => vec![
                "Check the remote firmware speaks ICP revision 1",
                "Look for other traffic on the ICP port",
            ],
            IcpError::PayloadTooLarge { .. } => {
                vec!["Split the write into several registers", "Payloads are limited to 255 bytes"]
            }
            IcpError::NoIdentifiersAvailable => vec![
                "Retry once outstanding transactions complete",
                "Lower the TTL of requests to free identifiers sooner",
                "Use the queued read path to wait for capacity",
            ],
            IcpError::DeviceTimeout { .. } => vec![
                "Retry the transaction",
                "Increase the TTL",
                "Check the device is powered and reachable",
            ],
            IcpError::DeviceError { .. } => vec![
                "Check the register address and subindex",
                "Consult the device documentation for the error code",
            ],
            IcpError::CacheMiss { .. } => vec![
                "Call refresh_register to populate the cache",
                "Wait for the accumulator poller to take its first sample",
            ],
            IcpError::TypeConversion { .. } => vec![
                "Check the data type requested for the register",
                "Read the register as raw bytes to inspect it",
            ],
            IcpError::InvalidConfig { .. } => vec!["Check the configuration values"],
            IcpError::Bind { .. } => vec![
                "Check no other process holds the ICP port",
                "Check permissions for the requested port",
                "Bind to port 0 for an ephemeral port",
            ],
            IcpError::Transport { .. } => {
                vec!["Check network connectivity", "Check firewall policy for UDP broadcast"]
            }
            IcpError::ArbiterClosed => vec!["Start a new arbiter"],
        }
    }

    /// Helper constructor for malformed packet errors.
    pub fn malformed(fault: DecodeFault) -> Self {
        IcpError::MalformedPacket { fault }
    }

    /// Helper constructor for type conversion errors.
    pub fn type_conversion(details: impl Into<String>) -> Self {
        IcpError::TypeConversion { details: details.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        IcpError::InvalidConfig { reason: reason.into() }
    }

    /// Helper constructor for transport errors.
    pub fn transport(operation: &'static str, source: std::io::Error) -> Self {
        IcpError::Transport { operation, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[cfg(test)]
    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
          #[test]
          fn error_messages_carry_their_context(
            code in any::<u32>(),
            message in "[a-zA-Z ]{0,40}",
            id in 1u8..=254u8,
            ttl_ms in 1u64..60_000u64
          ) {
            let address = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20));

            let device_error = IcpError::DeviceError { address, code, message: message.clone() };
            let msg = device_error.to_string();
            prop_assert!(msg.contains(&message));
            let hex = format!("{:#010x}", code);
            prop_assert!(msg.contains(&hex));

            let timeout = IcpError::DeviceTimeout {
                address,
                transaction_id: TransactionId::new(id).unwrap(),
                ttl: Duration::from_millis(ttl_ms),
            };
            let msg = timeout.to_string();
            prop_assert!(msg.contains("192.168.1.20"));
            prop_assert!(msg.contains(&id.to_string()));
          }
        }
    }

    #[test]
    fn decode_faults_display() {
        let err = IcpError::malformed(DecodeFault::BadMagic { found: *b"XPEL" });
        assert!(err.to_string().contains("bad magic"));

        let err = IcpError::malformed(DecodeFault::Truncated { declared: 12, available: 3 });
        assert!(err.to_string().contains("12"));
        assert!(err.to_string().contains("3 available"));
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<IcpError>();

        let error = IcpError::ArbiterClosed;
        let _: &dyn std::error::Error = &error;
    }

    #[test]
    fn recovery_methods_work() {
        let exhausted = IcpError::NoIdentifiersAvailable;
        let remote = IcpError::DeviceError {
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            code: 7,
            message: "bad register".to_string(),
        };

        assert!(exhausted.is_retryable());
        assert!(!remote.is_retryable());
        assert!(!IcpError::ArbiterClosed.is_retryable());

        for suggestion in exhausted.recovery_suggestions() {
            assert!(suggestion.len() > 5);
        }
        assert!(!remote.recovery_suggestions().is_empty());
    }

    #[test]
    fn bind_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use");
        let err = IcpError::Bind { address: "0.0.0.0:7968".parse().unwrap(), source: io };
        let source = std::error::Error::source(&err).expect("source should be kept");
        assert_eq!(source.to_string(), "in use");
    }
}
