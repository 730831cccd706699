//! Per-device slots for pending transactions

use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::oneshot;
use tracing::warn;

use super::Outcome;
use crate::types::TransactionId;

/// One-shot slots keyed by transaction identifier.
///
/// The arbiter opens a slot when it binds an identifier and fills it exactly once with the
/// transaction's outcome. Closing a slot without filling it wakes the caller with
/// [`IcpError::ArbiterClosed`](crate::IcpError::ArbiterClosed).
#[derive(Debug, Default)]
pub(crate) struct Inbox {
    slots: Mutex<HashMap<TransactionId, oneshot::Sender<Outcome>>>,
}

impl Inbox {
    pub fn open(&self, id: TransactionId, tx: oneshot::Sender<Outcome>) {
        if self.slots.lock().insert(id, tx).is_some() {
            warn!(id = %id, "Inbox slot reopened while still pending");
        }
    }

    /// Fill the slot for `id`. False when there is no slot or the caller stopped waiting.
    pub fn deliver(&self, id: TransactionId, outcome: Outcome) -> bool {
        let slot = self.slots.lock().remove(&id);
        match slot {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Close the slot for `id` without an outcome.
    pub fn abandon(&self, id: TransactionId) {
        self.slots.lock().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }
}
