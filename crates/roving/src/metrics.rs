//! Protocol metrics.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::Weight;

/// Point-in-time copy of a node's protocol counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Weight minted by this node's lifetime managers.
    pub weight_minted: u64,
    /// Weight returned to this node's lifetime managers.
    pub weight_retired: u64,
    /// Returns that exceeded the outstanding weight and were clamped.
    pub weight_clamps: u64,
    /// Lifetime managers created.
    pub lifetimes_created: u64,
    /// Lifetime managers that reached zero through returns.
    pub lifetimes_retired: u64,
    /// Lifetime managers forced to zero by timeout.
    pub lifetimes_expired: u64,
    /// Lifetime managers re-created by a late keepalive.
    pub lifetimes_reinstated: u64,
    /// Calls served against a locally hosted object.
    pub local_invocations: u64,
    /// Calls forwarded to another node.
    pub forwarded_invocations: u64,
    /// Redirects followed while forwarding.
    pub redirects: u64,
    /// Transfers built on this node.
    pub transfers_built: u64,
    /// Transfers materialized on this node.
    pub transfers_materialized: u64,
    /// Replayed transfers that were rejected.
    pub duplicate_transfers: u64,
    /// Stale grants sent back to their source.
    pub stale_grants: u64,
    /// Migrations committed away from this node.
    pub migrations_committed: u64,
    /// Commits that failed and left the object prepared.
    pub migrations_aborted: u64,
    /// Objects received through migration.
    pub migrations_received: u64,
    /// Automatic migrations started by the trigger.
    pub auto_migrations: u64,
    /// Keepalives sent.
    pub keepalives_sent: u64,
    /// One-way messages that could not be delivered.
    pub send_failures: u64,
}

/// Per-node cumulative protocol counters.
///
/// Counters only ever grow; use [`ProtocolMetrics::snapshot`] to read them.
#[derive(Debug, Default)]
pub struct ProtocolMetrics {
    weight_minted: AtomicU64,
    weight_retired: AtomicU64,
    weight_clamps: AtomicU64,
    lifetimes_created: AtomicU64,
    lifetimes_retired: AtomicU64,
    lifetimes_expired: AtomicU64,
    lifetimes_reinstated: AtomicU64,
    local_invocations: AtomicU64,
    forwarded_invocations: AtomicU64,
    redirects: AtomicU64,
    transfers_built: AtomicU64,
    transfers_materialized: AtomicU64,
    duplicate_transfers: AtomicU64,
    stale_grants: AtomicU64,
    migrations_committed: AtomicU64,
    migrations_aborted: AtomicU64,
    migrations_received: AtomicU64,
    auto_migrations: AtomicU64,
    keepalives_sent: AtomicU64,
    send_failures: AtomicU64,
}

#[inline]
fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[inline]
fn add_weight(counter: &AtomicU64, amount: Weight) {
    counter.fetch_add(amount.unsigned_abs(), Ordering::Relaxed);
}

impl ProtocolMetrics {
    /// Creates a zeroed set of counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads every counter.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            weight_minted: load(&self.weight_minted),
            weight_retired: load(&self.weight_retired),
            weight_clamps: load(&self.weight_clamps),
            lifetimes_created: load(&self.lifetimes_created),
            lifetimes_retired: load(&self.lifetimes_retired),
            lifetimes_expired: load(&self.lifetimes_expired),
            lifetimes_reinstated: load(&self.lifetimes_reinstated),
            local_invocations: load(&self.local_invocations),
            forwarded_invocations: load(&self.forwarded_invocations),
            redirects: load(&self.redirects),
            transfers_built: load(&self.transfers_built),
            transfers_materialized: load(&self.transfers_materialized),
            duplicate_transfers: load(&self.duplicate_transfers),
            stale_grants: load(&self.stale_grants),
            migrations_committed: load(&self.migrations_committed),
            migrations_aborted: load(&self.migrations_aborted),
            migrations_received: load(&self.migrations_received),
            auto_migrations: load(&self.auto_migrations),
            keepalives_sent: load(&self.keepalives_sent),
            send_failures: load(&self.send_failures),
        }
    }

    pub(crate) fn record_mint(&self, amount: Weight) {
        add_weight(&self.weight_minted, amount);
    }

    pub(crate) fn record_retire(&self, amount: Weight) {
        add_weight(&self.weight_retired, amount);
    }

    pub(crate) fn record_clamp(&self) {
        bump(&self.weight_clamps);
    }

    pub(crate) fn record_lifetime_created(&self) {
        bump(&self.lifetimes_created);
    }

    pub(crate) fn record_lifetime_retired(&self) {
        bump(&self.lifetimes_retired);
    }

    pub(crate) fn record_lifetime_expired(&self) {
        bump(&self.lifetimes_expired);
    }

    pub(crate) fn record_lifetime_reinstated(&self) {
        bump(&self.lifetimes_reinstated);
    }

    pub(crate) fn record_local_invocation(&self) {
        bump(&self.local_invocations);
    }

    pub(crate) fn record_forwarded_invocation(&self) {
        bump(&self.forwarded_invocations);
    }

    pub(crate) fn record_redirect(&self) {
        bump(&self.redirects);
    }

    pub(crate) fn record_transfer_built(&self) {
        bump(&self.transfers_built);
    }

    pub(crate) fn record_transfer_materialized(&self) {
        bump(&self.transfers_materialized);
    }

    pub(crate) fn record_duplicate_transfer(&self) {
        bump(&self.duplicate_transfers);
    }

    pub(crate) fn record_stale_grant(&self) {
        bump(&self.stale_grants);
    }

    pub(crate) fn record_migration_committed(&self) {
        bump(&self.migrations_committed);
    }

    pub(crate) fn record_migration_aborted(&self) {
        bump(&self.migrations_aborted);
    }

    pub(crate) fn record_migration_received(&self) {
        bump(&self.migrations_received);
    }

    pub(crate) fn record_auto_migration(&self) {
        bump(&self.auto_migrations);
    }

    pub(crate) fn record_keepalive(&self) {
        bump(&self.keepalives_sent);
    }

    pub(crate) fn record_send_failure(&self) {
        bump(&self.send_failures);
    }
}
