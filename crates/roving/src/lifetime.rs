//! Host-side weight supply.
//!
//! A [`LifetimeManager`] records how much weight its node has lent to one
//! claimant for one object. Its `outstanding` counter is strictly negative
//! while alive; reaching zero, through balanced returns or a forced expiry,
//! kills it for good. A later request for the same key creates a new manager.
//!
//! Each manager holds its object's [`LocationManager`], so an object stays
//! alive on a node for as long as any claim against that node is open.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::Weight;
use crate::error::LifetimeError;
use crate::id::{ObjectId, OwnershipKey};
use crate::location::LocationManager;
use crate::metrics::ProtocolMetrics;

/// Attempts made to replace a manager that expired under a concurrent mint.
const MINT_ATTEMPTS: usize = 4;

/// Tracks the weight lent to one claimant for one object.
pub(crate) struct LifetimeManager {
    key: OwnershipKey,
    outstanding: AtomicI64,
    last_refresh: Mutex<Instant>,
    _anchor: Arc<LocationManager>,
}

/// Result of applying a return to a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReturnOutcome {
    outstanding: Weight,
    clamped: bool,
    died: bool,
}

impl LifetimeManager {
    fn new(key: OwnershipKey, amount: Weight, anchor: Arc<LocationManager>) -> Self {
        Self {
            key,
            outstanding: AtomicI64::new(-amount),
            last_refresh: Mutex::new(Instant::now()),
            _anchor: anchor,
        }
    }

    /// The claim this manager tracks.
    #[must_use]
    pub const fn key(&self) -> &OwnershipKey {
        &self.key
    }

    /// Weight currently lent out, as a non-positive number.
    #[must_use]
    pub fn outstanding(&self) -> Weight {
        self.outstanding.load(Ordering::Acquire)
    }

    /// A manager is alive while it has weight outstanding.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.outstanding() < 0
    }

    fn lend(&self, amount: Weight) -> Result<Weight, LifetimeError> {
        self.outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if current == 0 {
                    None
                } else {
                    Some(current.saturating_sub(amount))
                }
            })
            .map(|previous| previous.saturating_sub(amount))
            .map_err(|_| LifetimeError::Expired(self.key.clone()))
    }

    fn accept_return(&self, amount: Weight) -> Option<ReturnOutcome> {
        let mut clamped = false;
        let previous = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if current == 0 {
                    return None;
                }
                let next = current.saturating_add(amount);
                clamped = next > 0;
                Some(next.min(0))
            })
            .ok()?;
        let outstanding = previous.saturating_add(amount).min(0);
        Some(ReturnOutcome {
            outstanding,
            clamped,
            died: outstanding == 0,
        })
    }

    /// Forces the manager to zero without waiting for returns.
    ///
    /// Returns the weight forfeited.
    fn expire(&self) -> Weight {
        self.outstanding.swap(0, Ordering::AcqRel)
    }

    fn refresh(&self, now: Instant) {
        let mut last = self.last_refresh.lock();
        if now > *last {
            *last = now;
        }
    }

    fn is_stale(&self, now: Instant, expiry: Duration) -> bool {
        now.saturating_duration_since(*self.last_refresh.lock()) > expiry
    }
}

impl std::fmt::Debug for LifetimeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifetimeManager")
            .field("key", &self.key)
            .field("outstanding", &self.outstanding())
            .finish_non_exhaustive()
    }
}

/// Expirable registry of lifetime managers keyed by claim.
#[derive(Default)]
pub(crate) struct LifetimeRegistry {
    managers: Mutex<HashMap<OwnershipKey, Arc<LifetimeManager>>>,
}

impl LifetimeRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Mints (`delta > 0`) or returns (`delta < 0`) weight for `key`.
    ///
    /// Minting creates the manager if needed, in which case `anchor` must be
    /// the object's location manager on this node. A manager found dead is
    /// replaced by a fresh one. Returning more than is outstanding is clamped.
    pub(crate) fn request_or_adjust(
        &self,
        key: &OwnershipKey,
        delta: Weight,
        anchor: Option<&Arc<LocationManager>>,
        metrics: &ProtocolMetrics,
    ) -> Result<(), LifetimeError> {
        match delta.signum() {
            1 => {
                let anchor = anchor.ok_or_else(|| LifetimeError::Unanchored(key.clone()))?;
                self.mint(key, delta, anchor, metrics).map(|_| ())
            }
            -1 => {
                self.retire(key, delta.saturating_neg(), metrics);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn mint(
        &self,
        key: &OwnershipKey,
        amount: Weight,
        anchor: &Arc<LocationManager>,
        metrics: &ProtocolMetrics,
    ) -> Result<Weight, LifetimeError> {
        let mut last_error = LifetimeError::Expired(key.clone());
        for _ in 0..MINT_ATTEMPTS {
            let existing = {
                let mut managers = self.managers.lock();
                match managers.get(key) {
                    Some(manager) => Arc::clone(manager),
                    None => {
                        let manager =
                            Arc::new(LifetimeManager::new(key.clone(), amount, Arc::clone(anchor)));
                        managers.insert(key.clone(), manager);
                        drop(managers);
                        metrics.record_lifetime_created();
                        metrics.record_mint(amount);
                        crate::tracing::weight_minted(key, amount, -amount);
                        return Ok(-amount);
                    }
                }
            };
            match existing.lend(amount) {
                Ok(outstanding) => {
                    existing.refresh(Instant::now());
                    metrics.record_mint(amount);
                    crate::tracing::weight_minted(key, amount, outstanding);
                    return Ok(outstanding);
                }
                Err(err) => {
                    crate::tracing::expired_manager_replaced(key);
                    drop(self.remove_if_same(&existing));
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }

    /// Applies a return of `amount` weight to `key`.
    ///
    /// Returns the outstanding weight afterwards, or `None` if no live manager
    /// exists for the key (its weight was already written off).
    pub(crate) fn retire(
        &self,
        key: &OwnershipKey,
        amount: Weight,
        metrics: &ProtocolMetrics,
    ) -> Option<Weight> {
        if amount <= 0 {
            return self.outstanding(key);
        }
        let Some(manager) = self.get(key) else {
            crate::tracing::return_for_unknown_key(key, amount);
            return None;
        };
        let before = manager.outstanding();
        let Some(outcome) = manager.accept_return(amount) else {
            crate::tracing::return_for_unknown_key(key, amount);
            drop(self.remove_if_same(&manager));
            return None;
        };
        if outcome.clamped {
            crate::tracing::weight_clamped(key, amount, before);
            metrics.record_clamp();
        }
        metrics.record_retire(amount);
        crate::tracing::weight_retired(key, amount, outcome.outstanding);
        if outcome.died {
            metrics.record_lifetime_retired();
            drop(self.remove_if_same(&manager));
        } else {
            manager.refresh(Instant::now());
        }
        Some(outcome.outstanding)
    }

    /// Handles a keepalive: refreshes the manager for `key`, or re-creates it
    /// with `-weight` if it already expired and `anchor` is available.
    ///
    /// Returns `true` if a manager was reinstated.
    pub(crate) fn keep_alive(
        &self,
        key: &OwnershipKey,
        weight: Weight,
        now: Instant,
        anchor: Option<&Arc<LocationManager>>,
        metrics: &ProtocolMetrics,
    ) -> bool {
        if let Some(manager) = self.get(key) {
            if manager.is_alive() {
                manager.refresh(now);
                return false;
            }
        }
        let Some(anchor) = anchor else {
            return false;
        };
        if weight <= 0 {
            return false;
        }
        let replaced = {
            let mut managers = self.managers.lock();
            if managers.get(key).is_some_and(|manager| manager.is_alive()) {
                return false;
            }
            managers.insert(
                key.clone(),
                Arc::new(LifetimeManager::new(key.clone(), weight, Arc::clone(anchor))),
            )
        };
        drop(replaced);
        metrics.record_lifetime_reinstated();
        crate::tracing::lifetime_reinstated(key, weight);
        true
    }

    /// Forces every manager not refreshed within `expiry` to zero and drops it.
    ///
    /// Returns the expired keys with the weight each forfeited.
    pub(crate) fn expire_stale(
        &self,
        now: Instant,
        expiry: Duration,
        metrics: &ProtocolMetrics,
    ) -> Vec<(OwnershipKey, Weight)> {
        let stale: Vec<Arc<LifetimeManager>> = {
            let mut managers = self.managers.lock();
            let keys: Vec<OwnershipKey> = managers
                .iter()
                .filter(|(_, manager)| manager.is_stale(now, expiry))
                .map(|(key, _)| key.clone())
                .collect();
            keys.iter().filter_map(|key| managers.remove(key)).collect()
        };

        stale
            .into_iter()
            .map(|manager| {
                let forfeited = manager.expire().saturating_neg();
                metrics.record_lifetime_expired();
                crate::tracing::lifetime_expired(manager.key(), forfeited);
                (manager.key().clone(), forfeited)
            })
            .collect()
    }

    /// Outstanding weight for `key`, if a live manager exists.
    #[must_use]
    pub(crate) fn outstanding(&self, key: &OwnershipKey) -> Option<Weight> {
        self.get(key)
            .map(|manager| manager.outstanding())
            .filter(|&w| w < 0)
    }

    /// Sum of outstanding weight lent for `object` across all claimants.
    #[must_use]
    pub(crate) fn outstanding_for(&self, object: &ObjectId) -> Weight {
        self.managers
            .lock()
            .values()
            .filter(|manager| manager.key().object() == object)
            .map(|manager| manager.outstanding())
            .sum()
    }

    /// Every live manager's key and outstanding weight.
    #[must_use]
    pub(crate) fn entries(&self) -> Vec<(OwnershipKey, Weight)> {
        self.managers
            .lock()
            .values()
            .map(|manager| (manager.key().clone(), manager.outstanding()))
            .collect()
    }

    /// Number of live managers.
    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.managers.lock().len()
    }

    pub(crate) fn clear(&self) {
        let drained: Vec<Arc<LifetimeManager>> =
            self.managers.lock().drain().map(|(_, manager)| manager).collect();
        drop(drained);
    }

    fn get(&self, key: &OwnershipKey) -> Option<Arc<LifetimeManager>> {
        self.managers.lock().get(key).cloned()
    }

    /// Removes `manager` if it is still the registered one for its key. The
    /// removed manager is returned so the caller drops it outside the lock.
    fn remove_if_same(&self, manager: &Arc<LifetimeManager>) -> Option<Arc<LifetimeManager>> {
        let mut managers = self.managers.lock();
        if managers
            .get(manager.key())
            .is_some_and(|current| Arc::ptr_eq(current, manager))
        {
            managers.remove(manager.key())
        } else {
            None
        }
    }
}

impl std::fmt::Debug for LifetimeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifetimeRegistry")
            .field("managers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::TimestampedLocation;
    use crate::transport::KindMarshaller;
    use crate::{LocalNetwork, Node};

    fn setup() -> (Node, Arc<LocationManager>, OwnershipKey) {
        let network = LocalNetwork::new();
        let node = network.add_node(Node::builder("a").marshaller(Arc::new(KindMarshaller::new())));
        let object = ObjectId::new("a".into(), 1);
        let anchor = LocationManager::remote(
            node.context(),
            object.clone(),
            TimestampedLocation::new("a".into(), 0),
        );
        (node, anchor, OwnershipKey::new(object, "b".into()))
    }

    #[test]
    fn mints_accumulate_and_balanced_returns_kill() {
        let (_node, anchor, key) = setup();
        let registry = LifetimeRegistry::new();
        let metrics = ProtocolMetrics::new();

        assert_eq!(registry.mint(&key, 10, &anchor, &metrics), Ok(-10));
        assert_eq!(registry.mint(&key, 5, &anchor, &metrics), Ok(-15));
        assert_eq!(registry.outstanding_for(key.object()), -15);

        assert_eq!(registry.retire(&key, 5, &metrics), Some(-10));
        assert_eq!(registry.retire(&key, 10, &metrics), Some(0));
        assert_eq!(registry.len(), 0);
        assert_eq!(metrics.snapshot().lifetimes_retired, 1);
    }

    #[test]
    fn over_return_is_clamped() {
        let (_node, anchor, key) = setup();
        let registry = LifetimeRegistry::new();
        let metrics = ProtocolMetrics::new();

        registry.mint(&key, 4, &anchor, &metrics).unwrap();
        assert_eq!(registry.retire(&key, 6, &metrics), Some(0));
        assert_eq!(metrics.snapshot().weight_clamps, 1);
        assert_eq!(registry.outstanding(&key), None);
    }

    #[test]
    fn minting_needs_an_anchor() {
        let (_node, _anchor, key) = setup();
        let registry = LifetimeRegistry::new();
        let metrics = ProtocolMetrics::new();

        assert_eq!(
            registry.request_or_adjust(&key, 3, None, &metrics),
            Err(LifetimeError::Unanchored(key.clone()))
        );
        assert_eq!(registry.request_or_adjust(&key, 0, None, &metrics), Ok(()));
    }

    #[test]
    fn expired_claims_ignore_returns_until_reinstated() {
        let (_node, anchor, key) = setup();
        let registry = LifetimeRegistry::new();
        let metrics = ProtocolMetrics::new();
        let expiry = Duration::from_secs(1);

        registry.mint(&key, 4, &anchor, &metrics).unwrap();
        let later = Instant::now() + Duration::from_secs(2);
        assert_eq!(
            registry.expire_stale(later, expiry, &metrics),
            vec![(key.clone(), 4)]
        );
        assert_eq!(registry.retire(&key, 1, &metrics), None);

        assert!(!registry.keep_alive(&key, 3, later, None, &metrics));
        assert!(registry.keep_alive(&key, 3, later, Some(&anchor), &metrics));
        assert_eq!(registry.outstanding(&key), Some(-3));
        assert!(!registry.keep_alive(&key, 3, later, Some(&anchor), &metrics));
        assert_eq!(metrics.snapshot().lifetimes_reinstated, 1);
    }
}
