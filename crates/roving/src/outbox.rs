//! Deferred one-way sends.
//!
//! Bookkeeping never performs I/O while it holds a lock. Anything that has to
//! go out as a side effect (weight returns, keepalives, automatic migrations)
//! is queued here and delivered by the next flush, after every lock has been
//! released.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_queue::SegQueue;

use crate::config::Weight;
use crate::id::{NodeAddress, OwnershipKey};
use crate::location::LocationManager;

/// A queued side effect.
pub(crate) enum Outgoing {
    /// Give `amount` back to the lifetime manager for `key` on `to`.
    Return {
        to: NodeAddress,
        key: OwnershipKey,
        amount: Weight,
    },
    /// Re-announce `weight` held under `key` to `to`.
    KeepAlive {
        to: NodeAddress,
        key: OwnershipKey,
        weight: Weight,
    },
    /// Relocate a tightened object to the node that just called it.
    Migrate {
        manager: Arc<LocationManager>,
        target: NodeAddress,
    },
}

impl std::fmt::Debug for Outgoing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Return { to, key, amount } => f
                .debug_struct("Return")
                .field("to", to)
                .field("key", key)
                .field("amount", amount)
                .finish(),
            Self::KeepAlive { to, key, weight } => f
                .debug_struct("KeepAlive")
                .field("to", to)
                .field("key", key)
                .field("weight", weight)
                .finish(),
            Self::Migrate { manager, target } => f
                .debug_struct("Migrate")
                .field("object", manager.id())
                .field("target", target)
                .finish(),
        }
    }
}

/// Lock-free queue of pending side effects with a single active drainer.
#[derive(Debug, Default)]
pub(crate) struct Outbox {
    queue: SegQueue<Outgoing>,
    draining: AtomicBool,
}

impl Outbox {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, item: Outgoing) {
        self.queue.push(item);
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Delivers queued items with `deliver` until the queue is empty.
    ///
    /// Only one caller drains at a time. A nested or concurrent call returns
    /// immediately; the active drainer picks up whatever it would have sent.
    pub(crate) fn drain(&self, mut deliver: impl FnMut(Outgoing)) {
        loop {
            if self
                .draining
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            while let Some(item) = self.queue.pop() {
                deliver(item);
            }
            self.draining.store(false, Ordering::Release);
            // An item pushed after the last pop but before the flag cleared
            // would otherwise wait for the next flush.
            if self.queue.is_empty() {
                return;
            }
        }
    }
}
