//! Location tracking and call forwarding.
//!
//! Every node that can reach an object keeps one [`LocationManager`] for it.
//! The manager records where the object is believed to live together with the
//! weight borrowed from that location, and routes calls either to the local
//! copy or to the believed host.
//!
//! # Placement
//!
//! The `(location, weight)` pair is swapped as a unit with compare-and-swap
//! semantics. A placement that names this node always carries zero weight;
//! a remote placement carries the weight this node holds from that host.
//!
//! # Locking
//!
//! The migration lock is read-held around every local call and around every
//! decision that depends on where the object is. It is never held across
//! network I/O by readers: a forwarded call borrows its loan, releases the
//! lock, and only then sends.

use std::cmp::Ordering as CmpOrdering;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crossbeam::utils::Backoff;
use parking_lot::{Mutex, RwLock};

use crate::config::Weight;
use crate::error::{Error, InvokeError};
use crate::id::{NodeAddress, ObjectId, OwnershipKey, TimestampedLocation};
use crate::message::{Request, Response};
use crate::migration::MigrationState;
use crate::node::NodeContext;
use crate::outbox::Outgoing;
use crate::remotable::Remotable;
use crate::trigger::{ReferenceStrength, Trigger};

/// Best-known location of an object and the weight borrowed from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Placement {
    pub(crate) location: TimestampedLocation,
    pub(crate) weight: Weight,
}

impl Placement {
    pub(crate) const fn new(location: TimestampedLocation, weight: Weight) -> Self {
        Self { location, weight }
    }
}

/// How a handle currently reaches its object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageMode {
    /// The handle owns the object and calls it directly.
    Direct,
    /// The handle decorates an object that is also referenced elsewhere.
    Wrapping,
    /// Calls go through the location manager, to the host or to a local copy
    /// that is being migrated.
    Forwarding,
}

pub(crate) enum Storage {
    Direct(Arc<dyn Remotable>),
    Wrapping(Arc<dyn Remotable>),
    /// `Some` while a prepared object is still hosted here.
    Forwarding(Option<Arc<dyn Remotable>>),
}

impl Storage {
    pub(crate) const fn object(&self) -> Option<&Arc<dyn Remotable>> {
        match self {
            Self::Direct(object) | Self::Wrapping(object) | Self::Forwarding(Some(object)) => {
                Some(object)
            }
            Self::Forwarding(None) => None,
        }
    }

    pub(crate) const fn mode(&self) -> StorageMode {
        match self {
            Self::Direct(_) => StorageMode::Direct,
            Self::Wrapping(_) => StorageMode::Wrapping,
            Self::Forwarding(_) => StorageMode::Forwarding,
        }
    }
}

/// Weight set aside from a placement for the duration of one operation.
///
/// Dropping the loan supplies the weight back to the location it came from.
/// If the placement moved on in the meantime, the ordinary stale-grant path
/// sends it home instead.
pub(crate) struct Loan<'a> {
    manager: &'a LocationManager,
    source: TimestampedLocation,
    amount: Weight,
}

impl Loan<'_> {
    pub(crate) const fn source(&self) -> &TimestampedLocation {
        &self.source
    }

    /// Hands the loaned weight to someone else. Nothing is returned on drop.
    pub(crate) fn consume(mut self) -> (TimestampedLocation, Weight) {
        let amount = std::mem::take(&mut self.amount);
        (self.source.clone(), amount)
    }
}

impl Drop for Loan<'_> {
    fn drop(&mut self) {
        if self.amount > 0 {
            let local = self.manager.local.clone();
            self.manager.supply_weight(self.amount, &self.source, &local);
        }
    }
}

/// Outcome of a forwarded call arriving at this node.
pub(crate) enum Served {
    Invoked {
        result: Result<Vec<u8>, InvokeError>,
        tight: bool,
    },
    Moved(TimestampedLocation),
}

/// Per-node tracker of one object's location, borrowed weight and storage.
pub struct LocationManager {
    id: ObjectId,
    local: NodeAddress,
    node: Weak<NodeContext>,
    placement: Mutex<Arc<Placement>>,
    direct_references: bool,
    pub(crate) migration_lock: RwLock<()>,
    pub(crate) migration: Mutex<MigrationState>,
    pub(crate) storage: RwLock<Storage>,
    pub(crate) trigger: Trigger,
    keepalive_due: Mutex<Option<Instant>>,
}

impl LocationManager {
    /// Manager for an object hosted on this node.
    pub(crate) fn hosted(
        node: &Arc<NodeContext>,
        id: ObjectId,
        storage: Storage,
        direct_references: bool,
    ) -> Arc<Self> {
        let here = TimestampedLocation::new(node.address.clone(), 0);
        Arc::new(Self::with_placement(
            node,
            id,
            Placement::new(here, 0),
            storage,
            direct_references,
        ))
    }

    /// Manager for an object believed to live at `location`. Starts without
    /// weight; callers supply it.
    pub(crate) fn remote(
        node: &Arc<NodeContext>,
        id: ObjectId,
        location: TimestampedLocation,
    ) -> Arc<Self> {
        Arc::new(Self::with_placement(
            node,
            id,
            Placement::new(location, 0),
            Storage::Forwarding(None),
            false,
        ))
    }

    fn with_placement(
        node: &Arc<NodeContext>,
        id: ObjectId,
        placement: Placement,
        storage: Storage,
        direct_references: bool,
    ) -> Self {
        Self {
            id,
            local: node.address.clone(),
            node: Arc::downgrade(node),
            placement: Mutex::new(Arc::new(placement)),
            direct_references,
            migration_lock: RwLock::new(()),
            migration: Mutex::new(MigrationState::Stable),
            storage: RwLock::new(storage),
            trigger: Trigger::new(),
            keepalive_due: Mutex::new(None),
        }
    }

    /// The tracked object.
    #[must_use]
    pub const fn id(&self) -> &ObjectId {
        &self.id
    }

    /// The node this manager lives on.
    #[must_use]
    pub const fn local_address(&self) -> &NodeAddress {
        &self.local
    }

    /// Returns `true` if references that bypass the manager exist.
    #[must_use]
    pub const fn has_direct_references(&self) -> bool {
        self.direct_references
    }

    /// Best-known location.
    #[must_use]
    pub fn location(&self) -> TimestampedLocation {
        self.placement().location.clone()
    }

    /// Weight currently borrowed from the best-known location.
    #[must_use]
    pub fn weight(&self) -> Weight {
        self.placement().weight
    }

    /// Returns `true` if the canonical copy lives on this node.
    #[must_use]
    pub fn is_hosted(&self) -> bool {
        self.placement().location.host() == &self.local
    }

    /// Next hop toward the host, or `None` if the object is hosted here.
    #[must_use]
    pub fn follow_location_chain(&self) -> Option<TimestampedLocation> {
        let placement = self.placement();
        (placement.location.host() != &self.local).then(|| placement.location.clone())
    }

    /// How calls currently reach the object.
    #[must_use]
    pub fn storage_mode(&self) -> StorageMode {
        self.storage.read().mode()
    }

    /// Current loose/tight trigger state.
    #[must_use]
    pub fn reference_strength(&self) -> ReferenceStrength {
        self.trigger.strength()
    }

    /// Returns `true` if a keepalive is scheduled for the borrowed weight.
    #[must_use]
    pub fn keepalive_armed(&self) -> bool {
        self.keepalive_due.lock().is_some()
    }

    pub(crate) fn context(&self) -> Result<Arc<NodeContext>, Error> {
        self.node.upgrade().ok_or(Error::NodeShutDown)
    }

    pub(crate) fn node(&self) -> Option<Arc<NodeContext>> {
        self.node.upgrade()
    }

    pub(crate) fn placement(&self) -> Arc<Placement> {
        Arc::clone(&self.placement.lock())
    }

    pub(crate) fn local_object(&self) -> Option<Arc<dyn Remotable>> {
        self.storage.read().object().cloned()
    }

    fn compare_and_swap(&self, current: &Arc<Placement>, next: Placement) -> bool {
        let mut slot = self.placement.lock();
        if Arc::ptr_eq(&slot, current) {
            *slot = Arc::new(next);
            true
        } else {
            false
        }
    }

    /// Installs `next` unconditionally and returns the placement it replaced.
    pub(crate) fn replace_placement(&self, next: Placement) -> Arc<Placement> {
        std::mem::replace(&mut *self.placement.lock(), Arc::new(next))
    }

    /// Borrows `amount` from a remote placement, leaving at least one unit
    /// behind. Returns `None` if the object is hosted here or the placement
    /// cannot spare the amount.
    pub(crate) fn try_borrow(&self, amount: Weight) -> Option<Loan<'_>> {
        let backoff = Backoff::new();
        loop {
            let current = self.placement();
            if current.location.host() == &self.local || current.weight <= amount {
                return None;
            }
            let next = Placement::new(current.location.clone(), current.weight - amount);
            if self.compare_and_swap(&current, next) {
                return Some(Loan {
                    manager: self,
                    source: current.location.clone(),
                    amount,
                });
            }
            backoff.spin();
        }
    }

    /// Like [`try_borrow`](Self::try_borrow), but falls back to an empty loan
    /// against the current remote location when no weight can be spared.
    fn borrow_for_call(&self, amount: Weight) -> Option<Loan<'_>> {
        if let Some(loan) = self.try_borrow(amount) {
            return Some(loan);
        }
        let current = self.placement();
        (current.location.host() != &self.local).then(|| Loan {
            manager: self,
            source: current.location.clone(),
            amount: 0,
        })
    }

    /// Accepts `amount` weight that was minted at `source` under the claim of
    /// `claimant`.
    ///
    /// Weight from the current location accumulates. Weight from an older
    /// location is sent back to it. Weight from a newer location replaces the
    /// current placement, and the superseded weight goes back to its source.
    pub(crate) fn supply_weight(
        &self,
        amount: Weight,
        source: &TimestampedLocation,
        claimant: &NodeAddress,
    ) {
        if amount <= 0 {
            return;
        }
        if source.host() == &self.local {
            crate::tracing::misdirected_grant(&self.id, amount);
            return;
        }

        let backoff = Backoff::new();
        loop {
            let current = self.placement();
            if source.conflicts_with(&current.location) {
                crate::tracing::location_conflict(&self.id, &current.location, source);
            }
            let ordering = if current.location.host() == &self.local {
                CmpOrdering::Less
            } else {
                source.cmp(&current.location)
            };

            match ordering {
                CmpOrdering::Equal => {
                    let next = Placement::new(
                        current.location.clone(),
                        current.weight.saturating_add(amount),
                    );
                    if self.compare_and_swap(&current, next) {
                        if current.weight == 0 {
                            self.arm_keepalive();
                        }
                        return;
                    }
                }
                CmpOrdering::Less => {
                    crate::tracing::stale_grant_returned(
                        &self.id,
                        amount,
                        source,
                        &current.location,
                    );
                    if let Some(node) = self.node() {
                        node.metrics.record_stale_grant();
                    }
                    self.return_weight(source.host(), claimant, amount);
                    return;
                }
                CmpOrdering::Greater => {
                    let next = Placement::new(source.clone(), amount);
                    if self.compare_and_swap(&current, next) {
                        crate::tracing::location_adopted(&self.id, &current.location, source);
                        if current.weight > 0 {
                            let local = self.local.clone();
                            self.return_weight(current.location.host(), &local, current.weight);
                        }
                        self.arm_keepalive();
                        return;
                    }
                }
            }
            backoff.spin();
        }
    }

    /// Queues `amount` for the lifetime manager `(object, claimant)` on `to`.
    pub(crate) fn return_weight(&self, to: &NodeAddress, claimant: &NodeAddress, amount: Weight) {
        if amount <= 0 || to == &self.local {
            return;
        }
        if let Some(node) = self.node() {
            node.outbox.push(Outgoing::Return {
                to: to.clone(),
                key: OwnershipKey::new(self.id.clone(), claimant.clone()),
                amount,
            });
        }
    }

    pub(crate) fn arm_keepalive(&self) {
        let Some(node) = self.node() else {
            return;
        };
        let mut due = self.keepalive_due.lock();
        if due.is_none() {
            *due = Some(Instant::now() + node.config.keepalive_interval());
        }
    }

    pub(crate) fn disarm_keepalive(&self) {
        *self.keepalive_due.lock() = None;
    }

    /// Returns the host and weight to re-announce if a keepalive is due at
    /// `now`, and schedules the next one. Disarms itself once the placement
    /// no longer carries weight.
    pub(crate) fn keepalive_due(
        &self,
        now: Instant,
        interval: Duration,
    ) -> Option<(NodeAddress, Weight)> {
        let mut due = self.keepalive_due.lock();
        let at = (*due)?;
        let placement = self.placement();
        if placement.location.host() == &self.local || placement.weight <= 0 {
            *due = None;
            return None;
        }
        if now < at {
            return None;
        }
        *due = Some(now + interval);
        Some((placement.location.host().clone(), placement.weight))
    }

    /// Calls `selector` on the object, locally or through its host.
    pub(crate) fn invoke(&self, selector: &str, args: &[u8]) -> Result<Vec<u8>, Error> {
        let node = self.context()?;
        let _span = crate::tracing::invoke_span(&self.local, &self.id, selector);
        let mut detour: Option<TimestampedLocation> = None;

        for hop in 0..=node.config.max_redirects {
            let loan = {
                let _read = self.migration_lock.read();
                match self.borrow_for_call(node.config.forward_loan) {
                    Some(loan) => loan,
                    None => {
                        let object = self.local_object().ok_or_else(|| {
                            Error::Protocol(format!("hosted object {} has no storage", self.id))
                        })?;
                        self.trigger.loosen();
                        node.metrics.record_local_invocation();
                        return object.invoke(selector, args).map_err(Error::from);
                    }
                }
            };

            let target = detour.take().unwrap_or_else(|| loan.source().clone());
            node.metrics.record_forwarded_invocation();
            let response = node.send(
                target.host(),
                Request::Invoke {
                    object: self.id.clone(),
                    selector: selector.to_owned(),
                    args: args.to_vec(),
                },
            );
            // The loan stays set aside until the reply is in.
            drop(loan);

            match response? {
                Response::Invoked(bytes) => return Ok(bytes),
                Response::Redirect { location, transfer } => {
                    node.metrics.record_redirect();
                    crate::tracing::redirected(&self.id, &location, hop + 1);
                    match transfer {
                        Some(transfer) => {
                            node.materialize_transfer(transfer)?;
                        }
                        None => detour = Some(location),
                    }
                }
                Response::Failed(err) => return Err(err.into()),
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected {} reply to invoke",
                        other.kind()
                    )))
                }
            }
        }

        Err(Error::TooManyRedirects {
            object: self.id.clone(),
            hops: node.config.max_redirects,
        })
    }

    /// Serves a call forwarded by another node.
    pub(crate) fn serve(&self, selector: &str, args: &[u8]) -> Served {
        let _read = self.migration_lock.read();
        let placement = self.placement();
        if placement.location.host() != &self.local {
            return Served::Moved(placement.location.clone());
        }
        let Some(object) = self.local_object() else {
            return Served::Moved(placement.location.clone());
        };
        if let Some(node) = self.node() {
            node.metrics.record_local_invocation();
        }
        Served::Invoked {
            result: object.invoke(selector, args),
            tight: self.trigger.is_tight(),
        }
    }
}

impl std::fmt::Debug for LocationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let placement = self.placement();
        f.debug_struct("LocationManager")
            .field("id", &self.id)
            .field("node", &self.local)
            .field("location", &placement.location)
            .field("weight", &placement.weight)
            .field("direct_references", &self.direct_references)
            .finish_non_exhaustive()
    }
}

impl Drop for LocationManager {
    fn drop(&mut self) {
        let placement = Arc::clone(self.placement.get_mut());
        let hosted = placement.location.host() == &self.local;
        crate::tracing::object_released(&self.id, hosted);
        if !hosted && placement.weight > 0 {
            let local = self.local.clone();
            self.return_weight(placement.location.host(), &local, placement.weight);
        }
    }
}
