//! The application-facing reference type.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::Weight;
use crate::error::{Error, MarshalError};
use crate::id::{NodeAddress, ObjectId, TimestampedLocation};
use crate::location::{LocationManager, StorageMode};
use crate::message::{Request, Response};
use crate::migration::MigrationState;
use crate::remotable::Remotable;
use crate::transfer::{self, ReferenceTransfer};
use crate::trigger::ReferenceStrength;

/// A reference to a possibly remote object of type `T`.
///
/// Every handle on a node shares that node's [`LocationManager`] for the
/// object, so cloning a handle costs an `Arc` bump and never talks to the
/// network. Calls go to the local copy when this node hosts the object and
/// are forwarded to the best-known host otherwise.
///
/// To give another node a reference, build a [`ReferenceTransfer`] with
/// [`Handle::transfer_to`] and have the recipient pass it to
/// [`Node::materialize`](crate::Node::materialize).
///
/// Dropping a handle performs no I/O. Weight held for the object goes back
/// to its source when the last handle and the last protocol reference on this
/// node are gone, on the next flush.
pub struct Handle<T> {
    manager: Arc<LocationManager>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub(crate) fn new(manager: Arc<LocationManager>) -> Self {
        manager.trigger.handle_acquired();
        Self {
            manager,
            _marker: PhantomData,
        }
    }

    /// Id of the referenced object.
    #[must_use]
    pub fn id(&self) -> &ObjectId {
        self.manager.id()
    }

    /// The location manager shared by every handle to this object on this
    /// node.
    #[must_use]
    pub const fn manager(&self) -> &Arc<LocationManager> {
        &self.manager
    }

    /// Returns `true` if the canonical copy lives on this node.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.manager.is_hosted()
    }

    /// Best-known location of the object.
    #[must_use]
    pub fn location(&self) -> TimestampedLocation {
        self.manager.location()
    }

    /// Weight this node holds from the best-known location.
    #[must_use]
    pub fn weight(&self) -> Weight {
        self.manager.weight()
    }

    /// Next hop toward the host, or `None` when hosted here.
    #[must_use]
    pub fn follow_location_chain(&self) -> Option<TimestampedLocation> {
        self.manager.follow_location_chain()
    }

    /// How calls through this handle currently reach the object.
    #[must_use]
    pub fn storage_mode(&self) -> StorageMode {
        self.manager.storage_mode()
    }

    /// Loose/tight trigger state of the object on this node.
    #[must_use]
    pub fn reference_strength(&self) -> ReferenceStrength {
        self.manager.reference_strength()
    }

    /// Migration state of the object on this node.
    #[must_use]
    pub fn migration_state(&self) -> MigrationState {
        self.manager.migration_state()
    }

    /// Calls `selector` with pre-encoded arguments.
    ///
    /// # Errors
    ///
    /// Returns the method's own [`InvokeError`](crate::InvokeError) wrapped
    /// in [`Error::Invoke`] or [`Error::Remote`], a transport failure, or
    /// [`Error::TooManyRedirects`] when the location chain does not settle.
    pub fn invoke(&self, selector: &str, args: &[u8]) -> Result<Vec<u8>, Error> {
        let result = self.manager.invoke(selector, args);
        self.flush();
        result
    }

    /// Calls `selector`, encoding `args` and decoding the result as JSON.
    ///
    /// # Errors
    ///
    /// As [`Handle::invoke`], plus [`Error::Marshal`] when either side does
    /// not encode or decode.
    pub fn call<A, R>(&self, selector: &str, args: &A) -> Result<R, Error>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let args = serde_json::to_vec(args).map_err(MarshalError::from)?;
        let bytes = self.invoke(selector, &args)?;
        Ok(serde_json::from_slice(&bytes).map_err(MarshalError::from)?)
    }

    /// Builds a one-shot transfer that lets `recipient` materialize its own
    /// handle to this object.
    ///
    /// # Errors
    ///
    /// Fails if the host has to be asked and cannot be reached, or if it no
    /// longer tracks the object.
    pub fn transfer_to(&self, recipient: &NodeAddress) -> Result<ReferenceTransfer, Error> {
        let node = self.manager.context()?;
        let result = transfer::new_transfer_for(&node, &self.manager, recipient);
        node.flush();
        result
    }

    /// Follows the location chain across the network until the host answers,
    /// and returns its location.
    ///
    /// The local placement is not changed; weight only moves with grants.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::TooManyRedirects`] if the host is not found within
    /// [`NodeConfig::max_redirects`](crate::NodeConfig::max_redirects) hops,
    /// or with the first transport or remote failure on the way.
    pub fn locate(&self) -> Result<TimestampedLocation, Error> {
        let result = self.locate_host();
        self.flush();
        result
    }

    fn locate_host(&self) -> Result<TimestampedLocation, Error> {
        let node = self.manager.context()?;
        let Some(mut next) = self.manager.follow_location_chain() else {
            return Ok(self.manager.location());
        };

        for _ in 0..node.config.max_redirects {
            if next.host() == &node.address {
                // The chain came back here; trust our own placement instead.
                let here = self.manager.location();
                if here.host() == &node.address {
                    return Ok(here);
                }
                next = here;
                continue;
            }
            let reply = node.send(
                next.host(),
                Request::Locate {
                    object: self.id().clone(),
                },
            )?;
            match reply {
                Response::Located {
                    location,
                    hosted: true,
                } => return Ok(location),
                Response::Located { location, .. } => next = location,
                Response::Failed(err) => return Err(err.into()),
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected {} reply to locate",
                        other.kind()
                    )))
                }
            }
        }

        Err(Error::TooManyRedirects {
            object: self.id().clone(),
            hops: node.config.max_redirects,
        })
    }

    /// Switches a hosted object to forwarding storage so it can be committed
    /// to another node. Repeating it is harmless.
    ///
    /// # Errors
    ///
    /// Fails with [`MigrationError::NotHosted`](crate::MigrationError::NotHosted)
    /// away from the host, and with
    /// [`MigrationError::DirectReferences`](crate::MigrationError::DirectReferences)
    /// for a wrapped object unless `force` is set.
    pub fn prepare(&self, force: bool) -> Result<(), Error> {
        self.manager.prepare(force)?;
        Ok(())
    }

    /// Moves a prepared object to `target`.
    ///
    /// Blocks other calls on this node for the object until both round trips
    /// to `target` complete.
    ///
    /// # Errors
    ///
    /// Any failure leaves the object prepared on this node, ready for another
    /// `commit` or a `conclude`.
    pub fn commit(&self, target: &NodeAddress) -> Result<(), Error> {
        let result = self.manager.commit(target).map_err(Error::from);
        self.flush();
        result
    }

    /// Ends a migration on whichever node hosts the object by now, restoring
    /// direct storage there.
    ///
    /// # Errors
    ///
    /// Fails while a commit is running, or when the host cannot be reached.
    pub fn conclude(&self) -> Result<(), Error> {
        let result = self.manager.conclude();
        self.flush();
        result
    }

    /// Prepares, commits to `target`, and concludes.
    ///
    /// If the commit fails the object is concluded in place, so it stays
    /// usable here, and the commit error is returned.
    ///
    /// # Errors
    ///
    /// The first failing step's error.
    pub fn migrate_to(&self, target: &NodeAddress) -> Result<(), Error> {
        self.prepare(false)?;
        if let Err(err) = self.commit(target) {
            if let Err(undo) = self.conclude() {
                crate::tracing::migration_aborted(self.id(), &undo);
            }
            return Err(err);
        }
        self.conclude()
    }

    fn flush(&self) {
        if let Some(node) = self.manager.node() {
            node.flush();
        }
    }
}

impl<T: Remotable> Handle<T> {
    /// Runs `f` against the local copy, if this node holds one.
    ///
    /// Returns `None` when the object lives elsewhere. A migration commit
    /// waits until `f` returns.
    pub fn with_local<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let _read = self.manager.migration_lock.read();
        let object = self.manager.local_object()?;
        let value = object.as_any().downcast_ref::<T>()?;
        self.manager.trigger.loosen();
        Some(f(value))
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.manager))
    }
}

impl<T> Drop for Handle<T> {
    fn drop(&mut self) {
        if self
            .manager
            .trigger
            .handle_released(self.manager.is_hosted())
        {
            crate::tracing::trigger_tightened(self.manager.id());
        }
    }
}

impl<T> std::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("type", &std::any::type_name::<T>())
            .field("manager", &self.manager)
            .finish()
    }
}
