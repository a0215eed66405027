//! Wire messages exchanged between nodes.

use serde::{Deserialize, Serialize};

use crate::config::Weight;
use crate::error::RemoteError;
use crate::id::{NodeAddress, ObjectId, OwnershipKey, TimestampedLocation};
use crate::transfer::ReferenceTransfer;

/// A request together with the address of the node that sent it.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope {
    /// Sending node.
    pub from: NodeAddress,
    /// The request itself.
    pub request: Request,
}

/// Requests understood by [`Node::on_message_arrived`](crate::Node::on_message_arrived).
#[derive(Debug, Serialize, Deserialize)]
pub enum Request {
    /// Forwarded method call. The caller keeps a loan set aside from its own
    /// placement until the reply arrives; no weight travels with the call.
    Invoke {
        /// Target object.
        object: ObjectId,
        /// Method name.
        selector: String,
        /// Encoded arguments.
        args: Vec<u8>,
    },
    /// Build a transfer of `object` for `recipient` on the caller's behalf.
    RequestTransfer {
        /// Object to transfer.
        object: ObjectId,
        /// Node the transfer is for.
        recipient: NodeAddress,
    },
    /// Give weight back to the lifetime manager for `key`.
    WeightReturn {
        /// Claim the weight belongs to.
        key: OwnershipKey,
        /// Weight being returned.
        amount: Weight,
    },
    /// Refresh the lifetime manager for `key`; `weight` is what the claimant holds.
    KeepAlive {
        /// Claim being refreshed.
        key: OwnershipKey,
        /// Weight the claimant holds.
        weight: Weight,
    },
    /// Ask for the responder's best-known location of `object`.
    Locate {
        /// Object to locate.
        object: ObjectId,
    },
    /// Announce an upcoming commit so the target can reserve a location manager.
    MigrationPrepareSync {
        /// Object about to move.
        object: ObjectId,
        /// The origin's current location.
        location: TimestampedLocation,
    },
    /// Hand over the object's state. `from` is the origin's location before the
    /// move and `origin_grant` the weight the target must lend back to it.
    MigrationCommit {
        /// Object being moved.
        object: ObjectId,
        /// Marshalled state.
        state: Vec<u8>,
        /// Location being retired.
        from: TimestampedLocation,
        /// Location the target takes over.
        location: TimestampedLocation,
        /// Weight lent back to the origin.
        origin_grant: Weight,
    },
    /// Finish a migration on whichever node now hosts `object`.
    Conclude {
        /// Object whose migration is finishing.
        object: ObjectId,
    },
}

impl Request {
    /// Short name used in logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Invoke { .. } => "invoke",
            Self::RequestTransfer { .. } => "request_transfer",
            Self::WeightReturn { .. } => "weight_return",
            Self::KeepAlive { .. } => "keepalive",
            Self::Locate { .. } => "locate",
            Self::MigrationPrepareSync { .. } => "migration_prepare_sync",
            Self::MigrationCommit { .. } => "migration_commit",
            Self::Conclude { .. } => "conclude",
        }
    }
}

/// Replies to [`Request`]s.
#[derive(Debug, Serialize, Deserialize)]
pub enum Response {
    /// One-way request accepted.
    Ack,
    /// Result of a forwarded call.
    Invoked(Vec<u8>),
    /// The responder no longer hosts the object. `transfer`, when present,
    /// grants the caller weight at the newer location.
    Redirect {
        /// Newer location.
        location: TimestampedLocation,
        /// Weight at `location` for the caller.
        transfer: Option<ReferenceTransfer>,
    },
    /// A transfer built in answer to `RequestTransfer`.
    Grant(ReferenceTransfer),
    /// Answer to `Locate`; `hosted` is set when the responder is the host.
    Located {
        /// Responder's best-known location.
        location: TimestampedLocation,
        /// Whether the responder hosts the object.
        hosted: bool,
    },
    /// Commit accepted. `returned` is the weight the target held from the origin.
    Committed {
        /// Weight to retire from the target's claim at the origin.
        returned: Weight,
    },
    /// The request failed on the remote node.
    Failed(RemoteError),
}

impl Response {
    pub(crate) const fn kind(&self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Invoked(_) => "invoked",
            Self::Redirect { .. } => "redirect",
            Self::Grant(_) => "grant",
            Self::Located { .. } => "located",
            Self::Committed { .. } => "committed",
            Self::Failed(_) => "failed",
        }
    }
}
