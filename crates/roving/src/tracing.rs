//! Protocol tracing.
//!
//! Every log site in the crate goes through one of the named helpers below.
//! With the `tracing` feature disabled they compile to nothing.

use crate::config::Weight;
use crate::id::{NodeAddress, ObjectId, OwnershipKey, TimestampedLocation, TransferId};

/// Guard returned by the span helpers.
#[cfg(feature = "tracing")]
pub type SpanGuard = tracing::span::EnteredSpan;

/// Stub guard when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type SpanGuard = ();

/// Span covering one invocation through a location manager.
#[cfg(feature = "tracing")]
pub fn invoke_span(node: &NodeAddress, object: &ObjectId, selector: &str) -> SpanGuard {
    tracing::debug_span!("roving.invoke", %node, %object, selector).entered()
}

/// Stub when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub fn invoke_span(_node: &NodeAddress, _object: &ObjectId, _selector: &str) -> SpanGuard {}

/// Span covering one migration commit.
#[cfg(feature = "tracing")]
pub fn migrate_span(node: &NodeAddress, object: &ObjectId, target: &NodeAddress) -> SpanGuard {
    tracing::info_span!("roving.migrate", %node, %object, %target).entered()
}

/// Stub when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub fn migrate_span(_node: &NodeAddress, _object: &ObjectId, _target: &NodeAddress) -> SpanGuard {}

/// Span covering one maintenance tick.
#[cfg(feature = "tracing")]
pub fn tick_span(node: &NodeAddress) -> SpanGuard {
    tracing::trace_span!("roving.tick", %node).entered()
}

/// Stub when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub fn tick_span(_node: &NodeAddress) -> SpanGuard {}

pub(crate) fn weight_minted(key: &OwnershipKey, amount: Weight, outstanding: Weight) {
    #[cfg(feature = "tracing")]
    tracing::debug!(%key, amount, outstanding, "weight_minted");
    #[cfg(not(feature = "tracing"))]
    let _ = (key, amount, outstanding);
}

pub(crate) fn weight_retired(key: &OwnershipKey, amount: Weight, outstanding: Weight) {
    #[cfg(feature = "tracing")]
    tracing::debug!(%key, amount, outstanding, "weight_retired");
    #[cfg(not(feature = "tracing"))]
    let _ = (key, amount, outstanding);
}

pub(crate) fn weight_clamped(key: &OwnershipKey, returned: Weight, outstanding: Weight) {
    #[cfg(feature = "tracing")]
    tracing::warn!(
        %key,
        returned,
        outstanding,
        "returned weight exceeds outstanding weight; clamping to zero"
    );
    #[cfg(not(feature = "tracing"))]
    let _ = (key, returned, outstanding);
}

pub(crate) fn return_for_unknown_key(key: &OwnershipKey, amount: Weight) {
    #[cfg(feature = "tracing")]
    tracing::debug!(%key, amount, "weight returned for a claim that already ended");
    #[cfg(not(feature = "tracing"))]
    let _ = (key, amount);
}

pub(crate) fn expired_manager_replaced(key: &OwnershipKey) {
    #[cfg(feature = "tracing")]
    tracing::debug!(%key, "lifetime manager expired concurrently; creating a fresh one");
    #[cfg(not(feature = "tracing"))]
    let _ = key;
}

pub(crate) fn lifetime_expired(key: &OwnershipKey, forfeited: Weight) {
    #[cfg(feature = "tracing")]
    tracing::warn!(
        %key,
        forfeited,
        "lifetime manager timed out without a keepalive; forcing expiry"
    );
    #[cfg(not(feature = "tracing"))]
    let _ = (key, forfeited);
}

pub(crate) fn lifetime_reinstated(key: &OwnershipKey, weight: Weight) {
    #[cfg(feature = "tracing")]
    tracing::warn!(%key, weight, "keepalive for an expired claim; reinstating lifetime manager");
    #[cfg(not(feature = "tracing"))]
    let _ = (key, weight);
}

pub(crate) fn stale_grant_returned(
    object: &ObjectId,
    amount: Weight,
    stale: &TimestampedLocation,
    current: &TimestampedLocation,
) {
    #[cfg(feature = "tracing")]
    tracing::debug!(%object, amount, %stale, %current, "stale weight grant sent back to its source");
    #[cfg(not(feature = "tracing"))]
    let _ = (object, amount, stale, current);
}

pub(crate) fn location_adopted(
    object: &ObjectId,
    previous: &TimestampedLocation,
    adopted: &TimestampedLocation,
) {
    #[cfg(feature = "tracing")]
    tracing::debug!(%object, %previous, %adopted, "adopted newer location");
    #[cfg(not(feature = "tracing"))]
    let _ = (object, previous, adopted);
}

pub(crate) fn location_conflict(
    object: &ObjectId,
    ours: &TimestampedLocation,
    theirs: &TimestampedLocation,
) {
    #[cfg(feature = "tracing")]
    tracing::warn!(%object, %ours, %theirs, "two hosts reported the same location version");
    #[cfg(not(feature = "tracing"))]
    let _ = (object, ours, theirs);
}

pub(crate) fn misdirected_grant(object: &ObjectId, amount: Weight) {
    #[cfg(feature = "tracing")]
    tracing::warn!(%object, amount, "weight grant names this node as its source; discarding");
    #[cfg(not(feature = "tracing"))]
    let _ = (object, amount);
}

pub(crate) fn send_failed(to: &NodeAddress, kind: &str, error: &dyn std::fmt::Display) {
    #[cfg(feature = "tracing")]
    tracing::warn!(%to, kind, %error, "one-way message could not be delivered");
    #[cfg(not(feature = "tracing"))]
    let _ = (to, kind, error);
}

pub(crate) fn message_received(from: &NodeAddress, kind: &str) {
    #[cfg(feature = "tracing")]
    tracing::trace!(%from, kind, "message_received");
    #[cfg(not(feature = "tracing"))]
    let _ = (from, kind);
}

pub(crate) fn redirected(object: &ObjectId, to: &TimestampedLocation, hop: usize) {
    #[cfg(feature = "tracing")]
    tracing::debug!(%object, %to, hop, "invocation redirected");
    #[cfg(not(feature = "tracing"))]
    let _ = (object, to, hop);
}

pub(crate) fn trigger_tightened(object: &ObjectId) {
    #[cfg(feature = "tracing")]
    tracing::debug!(%object, "object is held only by protocol bookkeeping");
    #[cfg(not(feature = "tracing"))]
    let _ = object;
}

pub(crate) fn duplicate_transfer(id: &TransferId) {
    #[cfg(feature = "tracing")]
    tracing::warn!(%id, "transfer materialized twice; ignoring the replay");
    #[cfg(not(feature = "tracing"))]
    let _ = id;
}

pub(crate) fn object_released(object: &ObjectId, hosted: bool) {
    #[cfg(feature = "tracing")]
    tracing::debug!(%object, hosted, "location manager released");
    #[cfg(not(feature = "tracing"))]
    let _ = (object, hosted);
}

pub(crate) fn migration_committed(object: &ObjectId, location: &TimestampedLocation) {
    #[cfg(feature = "tracing")]
    tracing::info!(%object, %location, "migration committed");
    #[cfg(not(feature = "tracing"))]
    let _ = (object, location);
}

pub(crate) fn migration_received(object: &ObjectId, from: &NodeAddress, grant: Weight) {
    #[cfg(feature = "tracing")]
    tracing::info!(%object, %from, grant, "migrated object installed");
    #[cfg(not(feature = "tracing"))]
    let _ = (object, from, grant);
}

pub(crate) fn migration_aborted(object: &ObjectId, error: &dyn std::fmt::Display) {
    #[cfg(feature = "tracing")]
    tracing::warn!(%object, %error, "migration commit aborted; object stays prepared");
    #[cfg(not(feature = "tracing"))]
    let _ = (object, error);
}

pub(crate) fn auto_migration(object: &ObjectId, target: &NodeAddress) {
    #[cfg(feature = "tracing")]
    tracing::info!(%object, %target, "relocating tightened object to its caller");
    #[cfg(not(feature = "tracing"))]
    let _ = (object, target);
}

pub(crate) fn auto_migration_skipped(object: &ObjectId, reason: &dyn std::fmt::Display) {
    #[cfg(feature = "tracing")]
    tracing::debug!(%object, %reason, "automatic migration skipped");
    #[cfg(not(feature = "tracing"))]
    let _ = (object, reason);
}
