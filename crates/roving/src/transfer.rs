//! One-shot weight capsules.
//!
//! A [`ReferenceTransfer`] is how a reference leaves a node: it carries a
//! quantity of weight for one object to one named recipient, which turns it
//! into a handle with [`Node::materialize`](crate::Node::materialize).

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::Weight;
use crate::error::Error;
use crate::id::{NodeAddress, ObjectId, OwnershipKey, TimestampedLocation, TransferId};
use crate::location::LocationManager;
use crate::message::{Request, Response};
use crate::node::NodeContext;

/// Wire-transmissible grant of weight for one object.
///
/// Transfers are deliberately not `Clone`, and materializing one consumes it.
/// Copies made by serializing the same transfer twice are caught by the
/// recipient's log of materialized ids.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceTransfer {
    id: TransferId,
    object: ObjectId,
    source: Option<TimestampedLocation>,
    weight: Weight,
    claimant: NodeAddress,
    recipient: NodeAddress,
}

impl ReferenceTransfer {
    pub(crate) const fn new(
        id: TransferId,
        object: ObjectId,
        source: Option<TimestampedLocation>,
        weight: Weight,
        claimant: NodeAddress,
        recipient: NodeAddress,
    ) -> Self {
        Self {
            id,
            object,
            source,
            weight,
            claimant,
            recipient,
        }
    }

    /// Unique id of this transfer.
    #[must_use]
    pub const fn id(&self) -> &TransferId {
        &self.id
    }

    /// The referenced object.
    #[must_use]
    pub const fn object(&self) -> &ObjectId {
        &self.object
    }

    /// Location the weight was minted at, or `None` for a weightless
    /// reference from a host to itself.
    #[must_use]
    pub const fn source(&self) -> Option<&TimestampedLocation> {
        self.source.as_ref()
    }

    /// Weight carried.
    #[must_use]
    pub const fn weight(&self) -> Weight {
        self.weight
    }

    /// Node whose claim at the source the weight was minted under.
    #[must_use]
    pub const fn claimant(&self) -> &NodeAddress {
        &self.claimant
    }

    /// The only node allowed to materialize this transfer.
    #[must_use]
    pub const fn recipient(&self) -> &NodeAddress {
        &self.recipient
    }
}

enum Plan {
    Ready(ReferenceTransfer),
    Delegate(NodeAddress),
}

/// Builds a transfer of `manager`'s object for `recipient`.
///
/// The strategy is chosen under the migration read lock:
///
/// - hosted here: mint a fresh grant under `(object, recipient)`, or a
///   weightless self-reference if the recipient is this node;
/// - hosted at the recipient: hand over a small loan from the local placement;
/// - otherwise: ask the believed host to build it.
pub(crate) fn new_transfer_for(
    node: &Arc<NodeContext>,
    manager: &Arc<LocationManager>,
    recipient: &NodeAddress,
) -> Result<ReferenceTransfer, Error> {
    let plan = {
        let _read = manager.migration_lock.read();
        let placement = manager.placement();
        let host = placement.location.host();
        if host == &node.address {
            if recipient == &node.address {
                Plan::Ready(node.issue_transfer(
                    manager.id().clone(),
                    None,
                    0,
                    node.address.clone(),
                    recipient.clone(),
                ))
            } else {
                let grant = node.config.initial_grant;
                let key = OwnershipKey::new(manager.id().clone(), recipient.clone());
                node.lifetimes
                    .request_or_adjust(&key, grant, Some(manager), &node.metrics)?;
                Plan::Ready(node.issue_transfer(
                    manager.id().clone(),
                    Some(placement.location.clone()),
                    grant,
                    recipient.clone(),
                    recipient.clone(),
                ))
            }
        } else if host == recipient {
            match manager.try_borrow(node.config.transfer_loan) {
                Some(loan) => {
                    let (source, weight) = loan.consume();
                    Plan::Ready(node.issue_transfer(
                        manager.id().clone(),
                        Some(source),
                        weight,
                        node.address.clone(),
                        recipient.clone(),
                    ))
                }
                None => Plan::Delegate(recipient.clone()),
            }
        } else {
            Plan::Delegate(host.clone())
        }
    };

    match plan {
        Plan::Ready(transfer) => {
            node.metrics.record_transfer_built();
            Ok(transfer)
        }
        Plan::Delegate(host) => {
            let request = Request::RequestTransfer {
                object: manager.id().clone(),
                recipient: recipient.clone(),
            };
            match node.send(&host, request)? {
                Response::Grant(transfer) => Ok(transfer),
                Response::Failed(err) => Err(err.into()),
                other => Err(Error::Protocol(format!(
                    "unexpected {} reply to request_transfer",
                    other.kind()
                ))),
            }
        }
    }
}

/// Turns `transfer` into the local location manager for its object.
pub(crate) fn materialize(
    node: &Arc<NodeContext>,
    transfer: ReferenceTransfer,
    now: Instant,
) -> Result<Arc<LocationManager>, Error> {
    if transfer.recipient != node.address {
        return Err(Error::WrongRecipient {
            id: transfer.id,
            expected: transfer.recipient,
            actual: node.address.clone(),
        });
    }
    if !node.materialized.record(&transfer.id, now) {
        node.metrics.record_duplicate_transfer();
        crate::tracing::duplicate_transfer(&transfer.id);
        return Err(Error::AlreadyMaterialized(transfer.id));
    }

    let ReferenceTransfer {
        object,
        source,
        weight,
        claimant,
        ..
    } = transfer;

    let manager = match source {
        None => node.locations.get(&object),
        Some(source) if source.host() == &node.address => {
            // Weight lent by this node coming home.
            let manager = node.locations.get(&object);
            node.lifetimes.retire(
                &OwnershipKey::new(object.clone(), claimant),
                weight,
                &node.metrics,
            );
            manager
        }
        Some(source) => {
            let manager = node.locations.get_or_insert_with(&object, || {
                LocationManager::remote(node, object.clone(), source.clone())
            });
            manager.supply_weight(weight, &source, &claimant);
            Some(manager)
        }
    };

    node.metrics.record_transfer_materialized();
    manager.ok_or(Error::NoSuchObject(object))
}

/// Ids of materialized transfers.
///
/// Recent ids are kept individually. Pruning folds them into a per-issuer
/// floor: since each issuer hands out serials in increasing order, any id at
/// or below its issuer's floor is treated as already materialized. A transfer
/// delivered later than the retention window is therefore refused; by then
/// its issuer's claim has expired anyway.
#[derive(Debug, Default)]
pub(crate) struct MaterializedLog {
    inner: Mutex<LogState>,
}

#[derive(Debug, Default)]
struct LogState {
    seen: HashMap<TransferId, Instant>,
    floors: HashMap<NodeAddress, u64>,
}

impl MaterializedLog {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records `id`. Returns `false` if it was materialized before.
    pub(crate) fn record(&self, id: &TransferId, now: Instant) -> bool {
        let mut state = self.inner.lock();
        if state
            .floors
            .get(id.issuer())
            .is_some_and(|&floor| id.serial() <= floor)
        {
            return false;
        }
        match state.seen.entry(id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
        }
    }

    /// Forgets ids older than `retention`, raising their issuers' floors.
    pub(crate) fn prune(&self, now: Instant, retention: Duration) {
        let mut state = self.inner.lock();
        let LogState { seen, floors } = &mut *state;
        seen.retain(|id, at| {
            if now.saturating_duration_since(*at) <= retention {
                return true;
            }
            let floor = floors.entry(id.issuer().clone()).or_insert(id.serial());
            *floor = (*floor).max(id.serial());
            false
        });
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().seen.len()
    }
}
