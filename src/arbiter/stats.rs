//! Arbiter counters and gauges

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::types::TransactionId;

/// Counters shared between the arbiter loop and its handles.
#[derive(Debug)]
pub(crate) struct Counters {
    pub sent: AtomicU64,
    pub received: AtomicU64,
    pub malformed: AtomicU64,
    pub unresolved: AtomicU64,
    pub timed_out: AtomicU64,
    pub send_errors: AtomicU64,
    /// Free identifiers, published by the loop after every table change
    pub free: AtomicUsize,
    /// Requests expecting a response that have not been bound yet
    pub queued: AtomicUsize,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            unresolved: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
            send_errors: AtomicU64::new(0),
            free: AtomicUsize::new(TransactionId::USABLE),
            queued: AtomicUsize::new(0),
        }
    }
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ArbiterStats {
        let free = self.free.load(Ordering::Acquire);
        ArbiterStats {
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            unresolved: self.unresolved.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            free_identifiers: free,
            in_flight: TransactionId::USABLE - free,
            queued: self.queued.load(Ordering::Acquire),
        }
    }
}

/// Point-in-time view of arbiter activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArbiterStats {
    /// Datagrams handed to the transport
    pub sent: u64,
    /// Datagrams decoded successfully
    pub received: u64,
    /// Datagrams dropped because they failed to decode
    pub malformed: u64,
    /// Responses dropped because no transaction matched them
    pub unresolved: u64,
    /// Transactions that reached their deadline
    pub timed_out: u64,
    /// Sends the transport rejected
    pub send_errors: u64,
    pub free_identifiers: usize,
    pub in_flight: usize,
    pub queued: usize,
}
