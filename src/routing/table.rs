//! In-flight transaction table

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use super::pool::{IdentifierPool, Lease};
use crate::types::TransactionId;
use crate::{IcpError, Result};

#[derive(Debug)]
struct Entry<D> {
    destination: D,
    deadline: Instant,
    lease: Lease,
}

/// Maps each bound identifier to the destination awaiting it and the deadline after which
/// the transaction counts as timed out.
///
/// The table owns the identifier pool. Every path that removes an entry (resolve, sweep,
/// drain) releases the entry's lease, so `available() + len()` is always
/// [`TransactionId::USABLE`].
#[derive(Debug)]
pub struct RoutingTable<D> {
    pool: IdentifierPool,
    entries: HashMap<TransactionId, Entry<D>>,
}

impl<D> RoutingTable<D> {
    pub fn new() -> Self {
        Self { pool: IdentifierPool::new(), entries: HashMap::with_capacity(TransactionId::USABLE) }
    }

    /// Bind a fresh identifier to `destination`, expiring `ttl` from now.
    pub fn bind(&mut self, destination: D, ttl: Duration) -> Result<TransactionId> {
        self.bind_at(destination, Instant::now() + ttl)
    }

    /// Bind a fresh identifier with an absolute deadline.
    pub fn bind_at(&mut self, destination: D, deadline: Instant) -> Result<TransactionId> {
        let lease = self.pool.allocate().ok_or(IcpError::NoIdentifiersAvailable)?;
        let id = lease.id();
        self.entries.insert(id, Entry { destination, deadline, lease });
        Ok(id)
    }

    /// Look at the destination bound to `id` without removing it.
    pub fn peek(&self, id: TransactionId) -> Option<&D> {
        self.entries.get(&id).map(|entry| &entry.destination)
    }

    /// Remove the entry for `id` and release its identifier.
    pub fn resolve(&mut self, id: TransactionId) -> Option<D> {
        let entry = self.entries.remove(&id)?;
        self.pool.release(entry.lease);
        Some(entry.destination)
    }

    /// Remove and release every entry whose deadline is at or before `now`.
    pub fn sweep_expired(&mut self, now: Instant) -> Vec<(TransactionId, D)> {
        let expired: Vec<TransactionId> =
            self.entries.iter().filter(|(_, entry)| entry.deadline <= now).map(|(id, _)| *id).collect();

        expired.into_iter().filter_map(|id| self.resolve(id).map(|destination| (id, destination))).collect()
    }

    /// Earliest deadline among bound entries.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().map(|entry| entry.deadline).min()
    }

    /// Remove and release every entry.
    pub fn drain(&mut self) -> Vec<(TransactionId, D)> {
        let ids: Vec<TransactionId> = self.entries.keys().copied().collect();
        ids.into_iter().filter_map(|id| self.resolve(id).map(|destination| (id, destination))).collect()
    }

    /// Number of bound entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of free identifiers.
    pub fn available(&self) -> usize {
        self.pool.available()
    }
}

impl<D> Default for RoutingTable<D> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn resolve_releases_exactly_once() {
        let mut table = RoutingTable::new();
        let id = table.bind("dev-a", Duration::from_secs(10)).unwrap();
        assert_eq!(table.available(), TransactionId::USABLE - 1);

        assert_eq!(table.resolve(id), Some("dev-a"));
        assert_eq!(table.resolve(id), None);
        assert_eq!(table.available(), TransactionId::USABLE);
    }

    #[test]
    fn exhaustion_reports_no_identifiers() {
        let mut table = RoutingTable::new();
        for n in 0..TransactionId::USABLE {
            table.bind(n, Duration::from_secs(10)).unwrap();
        }
        assert!(matches!(table.bind(999, Duration::from_secs(10)), Err(IcpError::NoIdentifiersAvailable)));
        assert_eq!(table.len(), TransactionId::USABLE);
    }

    #[test]
    fn sweep_only_takes_expired_entries() {
        let mut table = RoutingTable::new();
        let now = Instant::now();
        let early = table.bind_at("early", now + Duration::from_millis(5)).unwrap();
        let late = table.bind_at("late", now + Duration::from_secs(5)).unwrap();

        assert!(table.sweep_expired(now).is_empty());
        assert_eq!(table.next_deadline(), Some(now + Duration::from_millis(5)));

        let expired = table.sweep_expired(now + Duration::from_millis(5));
        assert_eq!(expired, vec![(early, "early")]);
        assert_eq!(table.peek(late), Some(&"late"));
        assert_eq!(table.available() + table.len(), TransactionId::USABLE);

        let drained = table.drain();
        assert_eq!(drained, vec![(late, "late")]);
        assert_eq!(table.available(), TransactionId::USABLE);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Bind(u64),
        Resolve(u8),
        Sweep(u64),
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => (1u64..100).prop_map(Op::Bind),
            2 => any::<u8>().prop_map(Op::Resolve),
            1 => (0u64..120).prop_map(Op::Sweep),
        ]
    }

    proptest! {
        #[test]
        fn prop_identifiers_are_exclusive_and_conserved(ops in proptest::collection::vec(arb_op(), 1..600)) {
            let origin = Instant::now();
            let mut table = RoutingTable::new();
            let mut bound: HashSet<TransactionId> = HashSet::new();

            for op in ops {
                match op {
                    Op::Bind(ms) => match table.bind_at((), origin + Duration::from_millis(ms)) {
                        Ok(id) => {
                            prop_assert!(!id.is_none());
                            prop_assert!(bound.insert(id), "identifier {} bound twice", id);
                        }
                        Err(err) => {
                            prop_assert!(matches!(err, IcpError::NoIdentifiersAvailable));
                            prop_assert_eq!(bound.len(), TransactionId::USABLE);
                        }
                    },
                    Op::Resolve(raw) => {
                        let id = TransactionId::from_raw(raw);
                        prop_assert_eq!(table.resolve(id).is_some(), bound.remove(&id));
                    }
                    Op::Sweep(ms) => {
                        for (id, ()) in table.sweep_expired(origin + Duration::from_millis(ms)) {
                            prop_assert!(bound.remove(&id));
                        }
                    }
                }
                prop_assert_eq!(table.len(), bound.len());
                prop_assert_eq!(table.available() + table.len(), TransactionId::USABLE);
            }
        }
    }
}
