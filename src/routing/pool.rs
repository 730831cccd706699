//! Transaction identifier pool

use std::collections::VecDeque;

use crate::types::TransactionId;

/// Owned right to one transaction identifier.
///
/// A lease is neither `Clone` nor `Copy`; handing it back to [`IdentifierPool::release`]
/// consumes it, so one identifier can only be returned once.
#[derive(Debug, PartialEq, Eq)]
pub struct Lease(TransactionId);

impl Lease {
    /// Identifier held by this lease
    pub fn id(&self) -> TransactionId {
        self.0
    }
}

/// Free list of the 254 usable identifiers.
///
/// Identifiers are handed out in FIFO order: a released identifier goes to the back of the
/// queue, so a late response for an expired transaction is unlikely to meet a new owner.
#[derive(Debug)]
pub struct IdentifierPool {
    free: VecDeque<TransactionId>,
}

impl IdentifierPool {
    /// A pool with every usable identifier free.
    pub fn new() -> Self {
        Self { free: TransactionId::usable().collect() }
    }

    /// Take the next free identifier; `None` when exhausted.
    pub fn allocate(&mut self) -> Option<Lease> {
        self.free.pop_front().map(Lease)
    }

    /// Return an identifier to the pool.
    pub fn release(&mut self, lease: Lease) {
        debug_assert!(!self.free.contains(&lease.0), "identifier {} released twice", lease.0);
        self.free.push_back(lease.0);
    }

    /// Number of free identifiers.
    pub fn available(&self) -> usize {
        self.free.len()
    }
}

impl Default for IdentifierPool {
    fn default() -> Self {
        Self::new()
    }
}
