//! Per-node context: registries, inbound dispatch and periodic maintenance.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;

use crate::config::{NodeConfig, Weight};
use crate::error::{Error, TransportError};
use crate::handle::Handle;
use crate::id::{NodeAddress, ObjectId, OwnershipKey, TimestampedLocation, TransferId};
use crate::lifetime::LifetimeRegistry;
use crate::location::{LocationManager, Served, Storage};
use crate::message::{Envelope, Request, Response};
use crate::metrics::{MetricsSnapshot, ProtocolMetrics};
use crate::migration::{self, Reservation};
use crate::outbox::{Outbox, Outgoing};
use crate::remotable::Remotable;
use crate::transfer::{self, MaterializedLog, ReferenceTransfer};
use crate::transport::{KindMarshaller, Marshaller, Transport};

/// Registry of the location managers on one node, held weakly.
///
/// A manager lives as long as a local handle or a lifetime manager anchors
/// it. Dead slots are skipped on lookup and purged by [`Node::tick`].
#[derive(Debug, Default)]
pub(crate) struct LocationRegistry {
    managers: Mutex<HashMap<ObjectId, Weak<LocationManager>>>,
}

impl LocationRegistry {
    pub(crate) fn get(&self, id: &ObjectId) -> Option<Arc<LocationManager>> {
        self.managers.lock().get(id).and_then(Weak::upgrade)
    }

    pub(crate) fn insert(&self, manager: &Arc<LocationManager>) {
        self.managers
            .lock()
            .insert(manager.id().clone(), Arc::downgrade(manager));
    }

    /// Returns the live manager for `id`, creating and registering one with
    /// `create` if there is none.
    pub(crate) fn get_or_insert_with(
        &self,
        id: &ObjectId,
        create: impl FnOnce() -> Arc<LocationManager>,
    ) -> Arc<LocationManager> {
        let mut managers = self.managers.lock();
        if let Some(manager) = managers.get(id).and_then(Weak::upgrade) {
            return manager;
        }
        let manager = create();
        managers.insert(id.clone(), Arc::downgrade(&manager));
        manager
    }

    pub(crate) fn live(&self) -> Vec<Arc<LocationManager>> {
        self.managers
            .lock()
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }

    pub(crate) fn purge(&self) {
        self.managers
            .lock()
            .retain(|_, manager| manager.strong_count() > 0);
    }

    pub(crate) fn len(&self) -> usize {
        self.managers
            .lock()
            .values()
            .filter(|manager| manager.strong_count() > 0)
            .count()
    }
}

/// State shared by everything that runs on one node.
pub(crate) struct NodeContext {
    pub(crate) address: NodeAddress,
    pub(crate) config: NodeConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) marshaller: Arc<dyn Marshaller>,
    pub(crate) locations: LocationRegistry,
    pub(crate) lifetimes: LifetimeRegistry,
    pub(crate) materialized: MaterializedLog,
    pub(crate) incoming: Mutex<HashMap<ObjectId, Reservation>>,
    pub(crate) outbox: Outbox,
    pub(crate) metrics: ProtocolMetrics,
    next_object: AtomicU64,
    next_transfer: AtomicU64,
}

impl NodeContext {
    pub(crate) fn send(
        &self,
        to: &NodeAddress,
        request: Request,
    ) -> Result<Response, TransportError> {
        self.transport.send(
            to,
            Envelope {
                from: self.address.clone(),
                request,
            },
        )
    }

    fn mint_object_id(&self) -> ObjectId {
        ObjectId::new(
            self.address.clone(),
            self.next_object.fetch_add(1, Ordering::Relaxed),
        )
    }

    pub(crate) fn issue_transfer(
        &self,
        object: ObjectId,
        source: Option<TimestampedLocation>,
        weight: Weight,
        claimant: NodeAddress,
        recipient: NodeAddress,
    ) -> ReferenceTransfer {
        let id = TransferId::new(
            self.address.clone(),
            self.next_transfer.fetch_add(1, Ordering::Relaxed),
        );
        ReferenceTransfer::new(id, object, source, weight, claimant, recipient)
    }

    pub(crate) fn materialize_transfer(
        self: &Arc<Self>,
        transfer: ReferenceTransfer,
    ) -> Result<Arc<LocationManager>, Error> {
        transfer::materialize(self, transfer, Instant::now())
    }

    /// Delivers everything queued on the outbox.
    pub(crate) fn flush(&self) {
        self.outbox.drain(|item| self.deliver(item));
    }

    fn deliver(&self, item: Outgoing) {
        match item {
            Outgoing::Return { to, key, amount } => {
                self.send_one_way(&to, Request::WeightReturn { key, amount });
            }
            Outgoing::KeepAlive { to, key, weight } => {
                self.metrics.record_keepalive();
                self.send_one_way(&to, Request::KeepAlive { key, weight });
            }
            Outgoing::Migrate { manager, target } => {
                migration::relocate(self, &manager, &target);
            }
        }
    }

    fn send_one_way(&self, to: &NodeAddress, request: Request) {
        let kind = request.kind();
        match self.send(to, request) {
            Ok(Response::Failed(err)) => crate::tracing::send_failed(to, kind, &err),
            Ok(_) => {}
            Err(err) => {
                self.metrics.record_send_failure();
                crate::tracing::send_failed(to, kind, &err);
            }
        }
    }

    fn handle(self: &Arc<Self>, envelope: Envelope) -> Result<Response, Error> {
        let Envelope { from, request } = envelope;
        crate::tracing::message_received(&from, request.kind());
        match request {
            Request::Invoke {
                object,
                selector,
                args,
            } => self.accept_invoke(&from, object, &selector, &args),
            Request::RequestTransfer { object, recipient } => {
                let manager = self.manager(object)?;
                let transfer = transfer::new_transfer_for(self, &manager, &recipient)?;
                Ok(Response::Grant(transfer))
            }
            Request::WeightReturn { key, amount } => {
                self.lifetimes.request_or_adjust(
                    &key,
                    amount.saturating_neg(),
                    None,
                    &self.metrics,
                )?;
                Ok(Response::Ack)
            }
            Request::KeepAlive { key, weight } => {
                let anchor = self.locations.get(key.object());
                self.lifetimes.keep_alive(
                    &key,
                    weight,
                    Instant::now(),
                    anchor.as_ref(),
                    &self.metrics,
                );
                Ok(Response::Ack)
            }
            Request::Locate { object } => {
                let location = self.manager(object)?.location();
                Ok(Response::Located {
                    hosted: location.host() == &self.address,
                    location,
                })
            }
            Request::MigrationPrepareSync { object, location } => {
                migration::accept_prepare_sync(self, &from, object, &location)
            }
            Request::MigrationCommit {
                object,
                state,
                from: from_location,
                location,
                origin_grant,
            } => migration::accept_commit(
                self,
                &from,
                object,
                &state,
                &from_location,
                location,
                origin_grant,
            ),
            Request::Conclude { object } => migration::accept_conclude(self, object),
        }
    }

    fn manager(&self, object: ObjectId) -> Result<Arc<LocationManager>, Error> {
        self.locations
            .get(&object)
            .ok_or(Error::NoSuchObject(object))
    }

    fn accept_invoke(
        self: &Arc<Self>,
        from: &NodeAddress,
        object: ObjectId,
        selector: &str,
        args: &[u8],
    ) -> Result<Response, Error> {
        let manager = self.manager(object)?;
        match manager.serve(selector, args) {
            Served::Invoked { result, tight } => {
                if tight && self.config.auto_migrate {
                    self.outbox.push(Outgoing::Migrate {
                        manager: Arc::clone(&manager),
                        target: from.clone(),
                    });
                }
                Ok(Response::Invoked(result?))
            }
            Served::Moved(location) => {
                // Give the caller weight at the newer location so it can
                // retire what it holds from us.
                let transfer = match transfer::new_transfer_for(self, &manager, from) {
                    Ok(transfer) => Some(transfer),
                    Err(err) => {
                        crate::tracing::send_failed(from, "redirect_grant", &err);
                        None
                    }
                };
                Ok(Response::Redirect { location, transfer })
            }
        }
    }
}

impl Drop for NodeContext {
    fn drop(&mut self) {
        self.incoming.get_mut().clear();
        self.lifetimes.clear();
    }
}

impl std::fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeContext")
            .field("address", &self.address)
            .field("locations", &self.locations.len())
            .field("lifetimes", &self.lifetimes)
            .field("pending", &self.outbox.len())
            .finish_non_exhaustive()
    }
}

/// One weight contribution on a node.
///
/// Positive weight is held from `counterpart`; negative weight is lent to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Node holding the entry.
    pub node: NodeAddress,
    /// The object the weight refers to.
    pub object: ObjectId,
    /// Host the weight was borrowed from, or claimant it was lent to.
    pub counterpart: NodeAddress,
    /// Signed amount.
    pub weight: Weight,
}

/// Configures and creates a [`Node`].
pub struct NodeBuilder {
    address: NodeAddress,
    config: NodeConfig,
    marshaller: Option<Arc<dyn Marshaller>>,
}

impl std::fmt::Debug for NodeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeBuilder")
            .field("address", &self.address)
            .field("config", &self.config)
            .field("marshaller", &self.marshaller.is_some())
            .finish()
    }
}

impl NodeBuilder {
    /// Uses `config` instead of the defaults.
    #[must_use]
    pub fn config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the marshaller used for migrating object state.
    ///
    /// Defaults to an empty [`KindMarshaller`], which cannot migrate anything.
    #[must_use]
    pub fn marshaller(mut self, marshaller: Arc<dyn Marshaller>) -> Self {
        self.marshaller = Some(marshaller);
        self
    }

    /// The address the node will have.
    #[must_use]
    pub const fn address(&self) -> &NodeAddress {
        &self.address
    }

    /// Creates the node. Inbound messages must be fed to
    /// [`Node::on_message_arrived`] by whatever drives `transport`.
    #[must_use]
    pub fn build(self, transport: Arc<dyn Transport>) -> Node {
        let marshaller = self
            .marshaller
            .unwrap_or_else(|| Arc::new(KindMarshaller::new()));
        Node {
            inner: Arc::new(NodeContext {
                address: self.address,
                config: self.config,
                transport,
                marshaller,
                locations: LocationRegistry::default(),
                lifetimes: LifetimeRegistry::new(),
                materialized: MaterializedLog::new(),
                incoming: Mutex::new(HashMap::new()),
                outbox: Outbox::new(),
                metrics: ProtocolMetrics::new(),
                next_object: AtomicU64::new(1),
                next_transfer: AtomicU64::new(1),
            }),
        }
    }
}

/// A participant in the protocol.
///
/// Cloning a `Node` is cheap and yields another reference to the same node.
/// The node shuts down when the last clone is dropped; handles that outlive
/// it fail with [`Error::NodeShutDown`].
#[derive(Debug, Clone)]
pub struct Node {
    inner: Arc<NodeContext>,
}

impl Node {
    /// Starts configuring a node reachable at `address`.
    #[must_use]
    pub fn builder(address: impl Into<NodeAddress>) -> NodeBuilder {
        NodeBuilder {
            address: address.into(),
            config: NodeConfig::default(),
            marshaller: None,
        }
    }

    pub(crate) const fn from_context(inner: Arc<NodeContext>) -> Self {
        Self { inner }
    }

    #[cfg(test)]
    pub(crate) const fn context(&self) -> &Arc<NodeContext> {
        &self.inner
    }

    pub(crate) fn downgrade(&self) -> Weak<NodeContext> {
        Arc::downgrade(&self.inner)
    }

    /// This node's address.
    #[must_use]
    pub fn address(&self) -> &NodeAddress {
        &self.inner.address
    }

    /// This node's configuration.
    #[must_use]
    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    /// Hosts `object` on this node and returns the first handle to it.
    ///
    /// The handle owns the object, so it can be migrated freely.
    pub fn export<T: Remotable>(&self, object: T) -> Handle<T> {
        self.host(Storage::Direct(Arc::new(object)), false)
    }

    /// Hosts an object that is also referenced outside the returned handle.
    ///
    /// Calls through those other references cannot be intercepted, so
    /// [`Handle::prepare`] refuses to migrate the object unless forced.
    pub fn wrap<T: Remotable>(&self, object: Arc<T>) -> Handle<T> {
        self.host(Storage::Wrapping(object), true)
    }

    fn host<T>(&self, storage: Storage, direct_references: bool) -> Handle<T> {
        let id = self.inner.mint_object_id();
        let manager = LocationManager::hosted(&self.inner, id, storage, direct_references);
        self.inner.locations.insert(&manager);
        Handle::new(manager)
    }

    /// Turns a transfer addressed to this node into a handle.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::WrongRecipient`] if the transfer was built for
    /// another node, [`Error::AlreadyMaterialized`] if it was already used
    /// here, and [`Error::NoSuchObject`] if it refers back to an object this
    /// node no longer tracks.
    pub fn materialize<T>(&self, transfer: ReferenceTransfer) -> Result<Handle<T>, Error> {
        let result = self.inner.materialize_transfer(transfer).map(Handle::new);
        self.inner.flush();
        result
    }

    /// Finds the current host of `handle`'s object. See [`Handle::locate`].
    ///
    /// # Errors
    ///
    /// As [`Handle::locate`].
    pub fn locate<T>(&self, handle: &Handle<T>) -> Result<TimestampedLocation, Error> {
        handle.locate()
    }

    /// Handles one inbound request and returns the reply for the sender.
    ///
    /// Failures are reported to the sender as [`Response::Failed`].
    pub fn on_message_arrived(&self, envelope: Envelope) -> Response {
        let response = self
            .inner
            .handle(envelope)
            .unwrap_or_else(|err| Response::Failed(err.into_remote()));
        self.inner.flush();
        response
    }

    /// Runs periodic maintenance as of now. See [`Node::tick_at`].
    pub fn tick(&self) {
        self.tick_at(Instant::now());
    }

    /// Runs periodic maintenance as of `now`: sends due keepalives, expires
    /// lifetime managers that were not refreshed within the expiry window,
    /// forgets old transfer ids and migration reservations, and flushes.
    pub fn tick_at(&self, now: Instant) {
        let context = &self.inner;
        let _span = crate::tracing::tick_span(&context.address);

        let interval = context.config.keepalive_interval();
        for manager in context.locations.live() {
            if let Some((to, weight)) = manager.keepalive_due(now, interval) {
                context.outbox.push(Outgoing::KeepAlive {
                    to,
                    key: OwnershipKey::new(manager.id().clone(), context.address.clone()),
                    weight,
                });
            }
        }

        context
            .lifetimes
            .expire_stale(now, context.config.expiry, &context.metrics);
        context
            .materialized
            .prune(now, context.config.materialized_retention);

        let abandoned: Vec<Reservation> = {
            let mut incoming = context.incoming.lock();
            let stale: Vec<ObjectId> = incoming
                .iter()
                .filter(|(_, reservation)| {
                    now.saturating_duration_since(reservation.since)
                        > context.config.incoming_timeout
                })
                .map(|(id, _)| id.clone())
                .collect();
            stale.iter().filter_map(|id| incoming.remove(id)).collect()
        };
        drop(abandoned);

        context.locations.purge();
        context.flush();
    }

    /// Delivers queued one-way messages.
    pub fn flush(&self) {
        self.inner.flush();
    }

    /// Number of one-way messages waiting for a flush.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.outbox.len()
    }

    /// Snapshot of this node's protocol counters.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Every weight contribution on this node: weight borrowed by location
    /// managers and weight lent by lifetime managers.
    ///
    /// Summed over all nodes at a quiescent point, the entries for any one
    /// object add up to zero.
    #[must_use]
    pub fn ledger(&self) -> Vec<LedgerEntry> {
        let context = &self.inner;
        let borrowed = context.locations.live().into_iter().filter_map(|manager| {
            let placement = manager.placement();
            (placement.weight != 0).then(|| LedgerEntry {
                node: context.address.clone(),
                object: manager.id().clone(),
                counterpart: placement.location.host().clone(),
                weight: placement.weight,
            })
        });
        let lent = context
            .lifetimes
            .entries()
            .into_iter()
            .map(|(key, outstanding)| LedgerEntry {
                node: context.address.clone(),
                object: key.object().clone(),
                counterpart: key.claimant().clone(),
                weight: outstanding,
            });
        borrowed.chain(lent).collect()
    }

    /// Returns `true` if this node hosts `object`.
    #[must_use]
    pub fn hosts(&self, object: &ObjectId) -> bool {
        self.inner
            .locations
            .get(object)
            .is_some_and(|manager| manager.is_hosted())
    }

    /// Outstanding weight lent under `key`, if its lifetime manager is alive.
    #[must_use]
    pub fn lifetime_outstanding(&self, key: &OwnershipKey) -> Option<Weight> {
        self.inner.lifetimes.outstanding(key)
    }

    /// Total weight this node has lent for `object`, across all claimants.
    /// Zero when no claim is open.
    #[must_use]
    pub fn lent_for(&self, object: &ObjectId) -> Weight {
        self.inner.lifetimes.outstanding_for(object)
    }

    /// Number of objects this node currently tracks.
    #[must_use]
    pub fn tracked_objects(&self) -> usize {
        self.inner.locations.len()
    }

    /// Number of live lifetime managers on this node.
    #[must_use]
    pub fn open_claims(&self) -> usize {
        self.inner.lifetimes.len()
    }
}
