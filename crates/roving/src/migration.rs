//! Migration state machine.
//!
//! ```text
//! Stable(here) --prepare--> Prepared --commit(target)--> Committing --> Stable(target)
//!      ^                       |
//!      +-------conclude--------+
//! ```
//!
//! `prepare` switches the object to forwarding storage and pins its trigger.
//! `commit` takes the migration write lock, so it waits for calls already
//! running against the local copy, ships the state and a weight grant to the
//! target, and only flips local bookkeeping once the target has accepted
//! both. Any failure leaves the object `Prepared`. `conclude` undoes
//! `prepare` on whichever node hosts the object by then.

use std::sync::Arc;
use std::time::Instant;

use crate::config::Weight;
use crate::error::{Error, MigrationError, RemoteError};
use crate::id::{NodeAddress, ObjectId, OwnershipKey, TimestampedLocation};
use crate::location::{LocationManager, Placement, Storage};
use crate::message::{Request, Response};
use crate::node::NodeContext;

/// Where an object is in its migration life cycle, as seen from one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MigrationState {
    /// No migration in progress. The object may be hosted here or elsewhere.
    Stable,
    /// Forwarding storage installed; ready to commit.
    Prepared,
    /// A commit holds the migration write lock.
    Committing,
}

/// A prepare-sync reservation waiting for its commit.
#[derive(Debug)]
pub(crate) struct Reservation {
    /// Keeps the reserved manager registered until the commit arrives.
    pub(crate) _manager: Arc<LocationManager>,
    pub(crate) since: Instant,
}

fn unexpected(reply: &Response, request: &str) -> RemoteError {
    RemoteError::Protocol(format!("unexpected {} reply to {request}", reply.kind()))
}

impl LocationManager {
    /// Current migration state on this node.
    #[must_use]
    pub fn migration_state(&self) -> MigrationState {
        *self.migration.lock()
    }

    pub(crate) fn prepare(&self, force: bool) -> Result<(), MigrationError> {
        let _read = self.migration_lock.read();
        let mut state = self.migration.lock();
        match *state {
            MigrationState::Prepared => return Ok(()),
            MigrationState::Committing => {
                return Err(MigrationError::CommitInProgress(self.id().clone()))
            }
            MigrationState::Stable => {}
        }

        let placement = self.placement();
        if placement.location.host() != self.local_address() {
            return Err(MigrationError::NotHosted {
                object: self.id().clone(),
                location: placement.location.clone(),
            });
        }
        if self.has_direct_references() && !force {
            return Err(MigrationError::DirectReferences(self.id().clone()));
        }

        self.trigger.pin();
        let mut storage = self.storage.write();
        let object = storage.object().cloned();
        *storage = Storage::Forwarding(object);
        *state = MigrationState::Prepared;
        Ok(())
    }

    /// Ships the object to `target` and installs its new location.
    ///
    /// The migration write lock is held across both round trips to `target`.
    /// Calls arriving at this node for the object wait for the commit to
    /// finish, then follow the new location if it succeeded.
    pub(crate) fn commit(&self, target: &NodeAddress) -> Result<(), MigrationError> {
        if target == self.local_address() {
            return Err(MigrationError::TargetIsHost(self.id().clone()));
        }
        let node = self.node().ok_or(MigrationError::NodeShutDown)?;
        {
            let mut state = self.migration.lock();
            match *state {
                MigrationState::Stable => {
                    return Err(MigrationError::NotPrepared(self.id().clone()))
                }
                MigrationState::Committing => {
                    return Err(MigrationError::CommitInProgress(self.id().clone()))
                }
                MigrationState::Prepared => *state = MigrationState::Committing,
            }
        }

        let _span = crate::tracing::migrate_span(self.local_address(), self.id(), target);
        let outcome = self.commit_to(&node, target);

        let mut state = self.migration.lock();
        match outcome {
            Ok(location) => {
                *state = MigrationState::Stable;
                drop(state);
                node.metrics.record_migration_committed();
                crate::tracing::migration_committed(self.id(), &location);
                Ok(())
            }
            Err(err) => {
                *state = MigrationState::Prepared;
                drop(state);
                node.metrics.record_migration_aborted();
                crate::tracing::migration_aborted(self.id(), &err);
                Err(err)
            }
        }
    }

    fn commit_to(
        &self,
        node: &NodeContext,
        target: &NodeAddress,
    ) -> Result<TimestampedLocation, MigrationError> {
        let _write = self.migration_lock.write();
        let current = self.placement();
        if current.location.host() != self.local_address() {
            return Err(MigrationError::NotHosted {
                object: self.id().clone(),
                location: current.location.clone(),
            });
        }
        let location = current.location.successor(target.clone());

        match node.send(
            target,
            Request::MigrationPrepareSync {
                object: self.id().clone(),
                location: location.clone(),
            },
        )? {
            Response::Ack => {}
            Response::Failed(err) => return Err(err.into()),
            other => return Err(unexpected(&other, "migration_prepare_sync").into()),
        }

        let object = self
            .local_object()
            .ok_or_else(|| MigrationError::NotPrepared(self.id().clone()))?;
        let state = node.marshaller.encode(object.as_ref())?;

        let grant = node.config.initial_grant;
        let returned = match node.send(
            target,
            Request::MigrationCommit {
                object: self.id().clone(),
                state,
                from: current.location.clone(),
                location: location.clone(),
                origin_grant: grant,
            },
        )? {
            Response::Committed { returned } => returned,
            Response::Failed(err) => return Err(err.into()),
            other => return Err(unexpected(&other, "migration_commit").into()),
        };

        // The target has the object and has lent us `grant`; from here on
        // nothing can fail.
        self.replace_placement(Placement::new(location.clone(), grant));
        self.arm_keepalive();
        node.lifetimes.retire(
            &OwnershipKey::new(self.id().clone(), target.clone()),
            returned,
            &node.metrics,
        );
        *self.storage.write() = Storage::Forwarding(None);
        Ok(location)
    }

    pub(crate) fn conclude(&self) -> Result<(), Error> {
        let node = self.context()?;
        let host = {
            let _read = self.migration_lock.read();
            let mut state = self.migration.lock();
            if *state == MigrationState::Committing {
                return Err(MigrationError::CommitInProgress(self.id().clone()).into());
            }
            let placement = self.placement();
            if placement.location.host() == self.local_address() {
                if *state == MigrationState::Prepared {
                    let mut storage = self.storage.write();
                    if let Some(object) = storage.object().cloned() {
                        *storage = if self.has_direct_references() {
                            Storage::Wrapping(object)
                        } else {
                            Storage::Direct(object)
                        };
                    }
                    *state = MigrationState::Stable;
                }
                self.trigger.unpin();
                return Ok(());
            }
            *state = MigrationState::Stable;
            self.trigger.unpin();
            placement.location.host().clone()
        };

        match node.send(
            &host,
            Request::Conclude {
                object: self.id().clone(),
            },
        )? {
            Response::Ack => Ok(()),
            Response::Failed(err) => Err(err.into()),
            other => Err(Error::Protocol(format!(
                "unexpected {} reply to conclude",
                other.kind()
            ))),
        }
    }
}

/// Target side of `MigrationPrepareSync`: reserve a location manager.
pub(crate) fn accept_prepare_sync(
    node: &Arc<NodeContext>,
    from: &NodeAddress,
    object: ObjectId,
    location: &TimestampedLocation,
) -> Result<Response, Error> {
    if location.host() != &node.address {
        return Err(Error::Protocol(format!(
            "migration of {object} to {} delivered to {}",
            location.host(),
            node.address
        )));
    }
    let previous = TimestampedLocation::new(from.clone(), location.version().saturating_sub(1));
    let manager = node.locations.get_or_insert_with(&object, || {
        LocationManager::remote(node, object.clone(), previous)
    });
    node.incoming.lock().insert(
        object,
        Reservation {
            _manager: manager,
            since: Instant::now(),
        },
    );
    Ok(Response::Ack)
}

/// Target side of `MigrationCommit`: install the object, lend the origin its
/// grant, and report the weight this node held from the origin.
pub(crate) fn accept_commit(
    node: &Arc<NodeContext>,
    from: &NodeAddress,
    object: ObjectId,
    state: &[u8],
    from_location: &TimestampedLocation,
    location: TimestampedLocation,
    origin_grant: Weight,
) -> Result<Response, Error> {
    if location.host() != &node.address {
        return Err(Error::Protocol(format!(
            "migration of {object} to {} delivered to {}",
            location.host(),
            node.address
        )));
    }
    let decoded = node.marshaller.decode(state)?;
    let manager = node.locations.get_or_insert_with(&object, || {
        LocationManager::remote(node, object.clone(), from_location.clone())
    });

    node.lifetimes.request_or_adjust(
        &OwnershipKey::new(object.clone(), from.clone()),
        origin_grant,
        Some(&manager),
        &node.metrics,
    )?;

    let previous = {
        let _write = manager.migration_lock.write();
        let previous = manager.replace_placement(Placement::new(location, 0));
        *manager.storage.write() = Storage::Forwarding(Some(decoded));
        *manager.migration.lock() = MigrationState::Prepared;
        manager.trigger.pin();
        manager.disarm_keepalive();
        previous
    };

    // Weight borrowed from the origin is settled through the reply; weight
    // still held from an older host goes back to that host.
    let returned = if previous.location.host() == from {
        previous.weight
    } else {
        manager.return_weight(previous.location.host(), &node.address, previous.weight);
        0
    };

    node.incoming.lock().remove(&object);
    node.metrics.record_migration_received();
    crate::tracing::migration_received(&object, from, origin_grant);
    Ok(Response::Committed { returned })
}

/// Host side of a delegated `Conclude`.
pub(crate) fn accept_conclude(node: &NodeContext, object: ObjectId) -> Result<Response, Error> {
    let manager = node
        .locations
        .get(&object)
        .ok_or(Error::NoSuchObject(object))?;
    manager.conclude()?;
    Ok(Response::Ack)
}

/// Moves a tightened object to `target`, the node that just called it.
pub(crate) fn relocate(node: &NodeContext, manager: &LocationManager, target: &NodeAddress) {
    if !manager.trigger.is_tight() {
        crate::tracing::auto_migration_skipped(manager.id(), &"object was loosened again");
        return;
    }
    crate::tracing::auto_migration(manager.id(), target);

    if let Err(err) = manager.prepare(false) {
        crate::tracing::auto_migration_skipped(manager.id(), &err);
        return;
    }
    if let Err(err) = manager.commit(target) {
        crate::tracing::auto_migration_skipped(manager.id(), &err);
        if let Err(err) = manager.conclude() {
            crate::tracing::auto_migration_skipped(manager.id(), &err);
        }
        return;
    }
    node.metrics.record_auto_migration();
    if let Err(err) = manager.conclude() {
        crate::tracing::auto_migration_skipped(manager.id(), &err);
    }
}
