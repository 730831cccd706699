//! Transaction outcomes and the caller-side wait

use futures::future::BoxFuture;
use std::future::IntoFuture;
use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::packet::{ErrorReport, Packet, PacketKind};
use crate::types::{DataType, RegisterKey, TransactionId, Value};
use crate::{IcpError, Result};

/// Terminal state of one transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The device answered
    Completed(Packet),
    /// The deadline passed with no answer
    TimedOut(TransactionId),
    /// The device answered with an Error packet
    Errored(ErrorReport),
}

impl Outcome {
    /// Classify a response delivered for a bound identifier.
    pub fn from_response(packet: Packet) -> Self {
        if packet.kind == PacketKind::Error {
            let report = packet.error_report().unwrap_or_else(|| ErrorReport {
                code: crate::packet::UNKNOWN_ERROR_CODE,
                message: "Unknown Error".to_string(),
            });
            Outcome::Errored(report)
        } else {
            Outcome::Completed(packet)
        }
    }

    /// Convert into the response packet or the matching error.
    pub fn into_response(self, address: IpAddr, ttl: Duration) -> Result<Packet> {
        match self {
            Outcome::Completed(packet) => Ok(packet),
            Outcome::TimedOut(transaction_id) => Err(IcpError::DeviceTimeout { address, transaction_id, ttl }),
            Outcome::Errored(ErrorReport { code, message }) => Err(IcpError::DeviceError { address, code, message }),
        }
    }
}

/// A queued request whose outcome has not been observed yet.
///
/// Awaiting it yields the response decoded as the requested data type. Waits are bounded
/// by the request TTL plus the arbiter's dispatch grace; a wait cut short by that guard
/// reports [`IcpError::DeviceTimeout`] with identifier `0`.
#[derive(Debug)]
#[must_use = "a pending transaction does nothing unless awaited"]
pub struct PendingTransaction {
    address: IpAddr,
    ttl: Duration,
    guard: Duration,
    data_type: DataType,
    /// Register the request addressed, for skipping an echoed header
    register: Option<RegisterKey>,
    rx: oneshot::Receiver<Outcome>,
}

impl PendingTransaction {
    pub(crate) fn new(
        address: IpAddr,
        ttl: Duration,
        guard: Duration,
        data_type: DataType,
        register: Option<RegisterKey>,
        rx: oneshot::Receiver<Outcome>,
    ) -> Self {
        Self { address, ttl, guard, data_type, register, rx }
    }

    /// Address of the device the request went to.
    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Wait for the raw outcome.
    pub async fn outcome(self) -> Result<Outcome> {
        match tokio::time::timeout(self.guard, self.rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err(IcpError::ArbiterClosed),
            Err(_) => Err(IcpError::DeviceTimeout {
                address: self.address,
                transaction_id: TransactionId::NONE,
                ttl: self.ttl,
            }),
        }
    }

    /// Wait for the response packet.
    pub async fn response(self) -> Result<Packet> {
        let (address, ttl) = (self.address, self.ttl);
        self.outcome().await?.into_response(address, ttl)
    }

    /// Wait for the response and decode it as the requested data type.
    pub async fn value(self) -> Result<Value> {
        let (data_type, register) = (self.data_type, self.register);
        let response = self.response().await?;
        match register {
            Some(key) => response.register_value(key, data_type),
            None => response.value(data_type),
        }
    }
}

impl IntoFuture for PendingTransaction {
    type Output = Result<Value>;
    type IntoFuture = BoxFuture<'static, Result<Value>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5));

    #[test]
    fn error_packets_become_errored() {
        let id = TransactionId::from_raw(12);
        let outcome = Outcome::from_response(Packet::error(id, 0x42, "locked"));
        assert_eq!(outcome, Outcome::Errored(ErrorReport { code: 0x42, message: "locked".to_string() }));

        let err = outcome.into_response(ADDRESS, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, IcpError::DeviceError { code: 0x42, .. }));
    }

    #[test]
    fn timeouts_keep_their_identifier() {
        let id = TransactionId::from_raw(77);
        let err = Outcome::TimedOut(id).into_response(ADDRESS, Duration::from_secs(3)).unwrap_err();
        assert!(matches!(err, IcpError::DeviceTimeout { transaction_id, .. } if transaction_id == id));
    }

    #[tokio::test]
    async fn closed_slot_reports_arbiter_closed() {
        let (tx, rx) = oneshot::channel();
        let pending = PendingTransaction::new(ADDRESS, Duration::from_secs(1), Duration::from_secs(2), DataType::Float, None, rx);
        drop(tx);
        assert!(matches!(pending.await, Err(IcpError::ArbiterClosed)));
    }

    #[tokio::test]
    async fn register_answers_skip_the_echoed_header() {
        let key = RegisterKey::new(0x2122, 1);
        let (tx, rx) = oneshot::channel();
        let pending =
            PendingTransaction::new(ADDRESS, Duration::from_secs(1), Duration::from_secs(2), DataType::String, Some(key), rx);
        let mut payload = vec![0x21, 0x22, 0x00, 0x01];
        payload.extend_from_slice(b"Volts");
        let response = Packet::response(PacketKind::RegisterWrite, TransactionId::from_raw(5), payload);
        tx.send(Outcome::Completed(response)).unwrap();

        assert_eq!(pending.await.unwrap(), Value::String("Volts".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn guard_bounds_the_wait() {
        let (_tx, rx) = oneshot::channel();
        let pending = PendingTransaction::new(ADDRESS, Duration::from_secs(1), Duration::from_secs(2), DataType::Float, None, rx);
        let err = pending.outcome().await.unwrap_err();
        assert!(matches!(err, IcpError::DeviceTimeout { transaction_id, .. } if transaction_id.is_none()));
    }
}
