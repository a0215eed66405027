//! Identity types: nodes, objects, locations and claims.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque, comparable identity of a participating node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeAddress(String);

impl NodeAddress {
    /// Creates an address from any string-like endpoint name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the endpoint name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeAddress {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Globally unique object identity.
///
/// Minted once by the node on which the object first becomes remotely
/// referenceable. The `(origin, serial)` pair is never reused because each
/// node draws serials from a monotonically increasing counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId {
    origin: NodeAddress,
    serial: u64,
}

impl ObjectId {
    pub(crate) const fn new(origin: NodeAddress, serial: u64) -> Self {
        Self { origin, serial }
    }

    /// The node that minted this id. Not necessarily the current host.
    #[must_use]
    pub const fn origin(&self) -> &NodeAddress {
        &self.origin
    }

    /// Per-origin serial number.
    #[must_use]
    pub const fn serial(&self) -> u64 {
        self.serial
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.origin, self.serial)
    }
}

/// A host address tagged with a version counter.
///
/// Only the current host advances the version, by exactly one, when it
/// migrates the object away, so a higher version is always the more recent
/// report. Equal versions naming different hosts cannot arise from the
/// migration protocol; if they do (for example after a forced expiry split
/// the object), the host address breaks the tie so every node agrees on the
/// same winner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimestampedLocation {
    host: NodeAddress,
    version: u64,
}

impl TimestampedLocation {
    /// Creates a location report.
    #[must_use]
    pub const fn new(host: NodeAddress, version: u64) -> Self {
        Self { host, version }
    }

    /// The node believed to hold the canonical copy.
    #[must_use]
    pub const fn host(&self) -> &NodeAddress {
        &self.host
    }

    /// Version of this report.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// The location the object will have after its host migrates it to `target`.
    #[must_use]
    pub fn successor(&self, target: NodeAddress) -> Self {
        Self {
            host: target,
            version: self.version.saturating_add(1),
        }
    }

    /// Returns `true` if both reports have the same version but disagree on the host.
    #[must_use]
    pub fn conflicts_with(&self, other: &Self) -> bool {
        self.version == other.version && self.host != other.host
    }
}

impl PartialOrd for TimestampedLocation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimestampedLocation {
    fn cmp(&self, other: &Self) -> Ordering {
        self.version
            .cmp(&other.version)
            .then_with(|| self.host.cmp(&other.host))
    }
}

impl fmt::Display for TimestampedLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@v{}", self.host, self.version)
    }
}

/// One node's claim on one object.
///
/// Lifetime managers on a host are keyed by the claiming node, so weight lent
/// to different nodes is tracked (and times out) independently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnershipKey {
    object: ObjectId,
    claimant: NodeAddress,
}

impl OwnershipKey {
    /// Creates a claim key.
    #[must_use]
    pub const fn new(object: ObjectId, claimant: NodeAddress) -> Self {
        Self { object, claimant }
    }

    /// The claimed object.
    #[must_use]
    pub const fn object(&self) -> &ObjectId {
        &self.object
    }

    /// The node holding the claim.
    #[must_use]
    pub const fn claimant(&self) -> &NodeAddress {
        &self.claimant
    }
}

impl fmt::Display for OwnershipKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} claimed by {}", self.object, self.claimant)
    }
}

/// Identity of one `ReferenceTransfer`, used to reject replays.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferId {
    issuer: NodeAddress,
    serial: u64,
}

impl TransferId {
    pub(crate) const fn new(issuer: NodeAddress, serial: u64) -> Self {
        Self { issuer, serial }
    }

    /// Node that built the transfer.
    #[must_use]
    pub const fn issuer(&self) -> &NodeAddress {
        &self.issuer
    }

    /// Per-issuer serial. Serials only grow.
    #[must_use]
    pub const fn serial(&self) -> u64 {
        self.serial
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "xfer:{}#{}", self.issuer, self.serial)
    }
}
