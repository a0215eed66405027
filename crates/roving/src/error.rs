//! Error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::{NodeAddress, ObjectId, OwnershipKey, TimestampedLocation, TransferId};

/// Failure delivering a message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// No endpoint is registered under the address.
    #[error("node {0} is unreachable")]
    Unreachable(NodeAddress),
    /// The message was lost in transit.
    #[error("message to {to} was dropped")]
    Dropped {
        /// Intended recipient.
        to: NodeAddress,
    },
    /// The recipient was on the network but has shut down.
    #[error("transport closed")]
    Closed,
}

/// Failure encoding or decoding object state.
#[derive(Debug, Error)]
pub enum MarshalError {
    /// Encoded state names a kind this marshaller cannot build.
    #[error("unknown object kind {0:?}")]
    UnknownKind(String),
    /// The object's type was never registered.
    #[error("object type {0} is not registered with the marshaller")]
    UnregisteredType(&'static str),
    /// The payload could not be (de)serialized.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Failure raised by a remotable method. Crosses the wire unchanged.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvokeError {
    /// No method with this selector.
    #[error("unknown selector {0:?}")]
    UnknownSelector(String),
    /// The encoded arguments did not decode.
    #[error("bad arguments: {0}")]
    BadArguments(String),
    /// The method itself failed.
    #[error("{0}")]
    Failed(String),
}

/// Error reported by a remote node in a `Failed` response.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteError {
    /// The node has no location manager for the object.
    #[error("no such object {0}")]
    NoSuchObject(ObjectId),
    /// The invoked method failed.
    #[error(transparent)]
    Invoke(#[from] InvokeError),
    /// A migration step was refused.
    #[error("migration refused: {0}")]
    Migration(String),
    /// Any other protocol failure on the remote side.
    #[error("remote protocol error: {0}")]
    Protocol(String),
}

/// Caller-recoverable migration failures. The object is left as it was.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The object is not hosted on this node.
    #[error("object {object} is hosted at {location}, not here")]
    NotHosted {
        /// The object that was asked to migrate.
        object: ObjectId,
        /// Where this node believes it lives.
        location: TimestampedLocation,
    },
    /// References that bypass the handle exist; pass `force` to migrate anyway.
    #[error("object {0} has direct references and cannot be migrated without forcing")]
    DirectReferences(ObjectId),
    /// `commit` was called without a preceding `prepare`.
    #[error("object {0} is not prepared for migration")]
    NotPrepared(ObjectId),
    /// Another commit for the object is running.
    #[error("a commit for object {0} is already in progress")]
    CommitInProgress(ObjectId),
    /// The migration target already hosts the object.
    #[error("object {0} is already hosted at the target")]
    TargetIsHost(ObjectId),
    /// Delivery to the target failed; the object stays prepared.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The object's state could not be encoded.
    #[error(transparent)]
    Marshal(#[from] MarshalError),
    /// The target refused the migration.
    #[error(transparent)]
    Remote(#[from] RemoteError),
    /// This node is shutting down.
    #[error("node has shut down")]
    NodeShutDown,
}

/// Crate-level error.
#[derive(Debug, Error)]
pub enum Error {
    /// No location manager exists for the object on the responding node.
    #[error("no such object {0}")]
    NoSuchObject(ObjectId),
    /// The transfer was already materialized on this node.
    #[error("transfer {0} was already materialized")]
    AlreadyMaterialized(TransferId),
    /// The transfer was addressed to a different node.
    #[error("transfer {id} is addressed to {expected}, not {actual}")]
    WrongRecipient {
        /// The rejected transfer.
        id: TransferId,
        /// Recipient named in the transfer.
        expected: NodeAddress,
        /// Node that tried to materialize it.
        actual: NodeAddress,
    },
    /// The location chain did not converge.
    #[error("gave up locating {object} after {hops} hops")]
    TooManyRedirects {
        /// Object being located.
        object: ObjectId,
        /// Hops followed before giving up.
        hops: usize,
    },
    /// The owning node was dropped.
    #[error("node has shut down")]
    NodeShutDown,
    /// The peer answered with a response that does not fit the request.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The invoked method failed locally.
    #[error(transparent)]
    Invoke(#[from] InvokeError),
    /// A message could not be delivered.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// A migration step failed.
    #[error(transparent)]
    Migration(#[from] MigrationError),
    /// Object state could not be encoded or decoded.
    #[error(transparent)]
    Marshal(#[from] MarshalError),
    /// The remote node reported a failure.
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl Error {
    pub(crate) fn into_remote(self) -> RemoteError {
        match self {
            Self::NoSuchObject(id) => RemoteError::NoSuchObject(id),
            Self::Invoke(err) => RemoteError::Invoke(err),
            Self::Remote(err) => err,
            Self::Migration(err) => RemoteError::Migration(err.to_string()),
            other => RemoteError::Protocol(other.to_string()),
        }
    }
}

/// Internal failure of the lifetime registry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub(crate) enum LifetimeError {
    /// The manager reached zero weight (or timed out) and cannot be re-armed.
    #[error("lifetime manager for {0} has expired")]
    Expired(OwnershipKey),
    /// Minting needs the hosted object's location manager and none was supplied.
    #[error("no location manager to anchor {0}")]
    Unanchored(OwnershipKey),
}

impl From<LifetimeError> for Error {
    fn from(err: LifetimeError) -> Self {
        Self::Protocol(err.to_string())
    }
}
