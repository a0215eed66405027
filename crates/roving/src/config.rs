//! Node configuration.

use std::time::Duration;

/// A signed quantity of GC weight.
///
/// Positive holdings are permission to reference a remote object; a host's
/// lifetime managers hold the matching negative amounts.
pub type Weight = i64;

/// Default time a lifetime manager survives without a refresh.
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(60);
/// Weight minted by a host for every transfer it builds and every migration.
pub const DEFAULT_INITIAL_GRANT: Weight = 1 << 32;
/// Transient loan carried by one forwarded invocation.
pub const DEFAULT_FORWARD_LOAN: Weight = 1;
/// Loan handed to the host when a reference is sent back to it.
pub const DEFAULT_TRANSFER_LOAN: Weight = 1;
/// Maximum redirect or locate hops before giving up.
pub const DEFAULT_MAX_REDIRECTS: usize = 8;

/// Per-node protocol tuning.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Lifetime manager timeout. Keepalives go out at half this interval.
    pub expiry: Duration,
    /// Weight minted per host-built transfer and per migration grant.
    pub initial_grant: Weight,
    /// Loan borrowed for the duration of a forwarded call.
    pub forward_loan: Weight,
    /// Loan used when the transfer target already hosts the object.
    pub transfer_loan: Weight,
    /// Bound on redirects followed by one invocation or locate.
    pub max_redirects: usize,
    /// Relocate tightened objects to the next remote caller.
    pub auto_migrate: bool,
    /// How long materialized transfer ids are remembered.
    pub materialized_retention: Duration,
    /// How long a migration reservation waits for its commit.
    pub incoming_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            expiry: DEFAULT_EXPIRY,
            initial_grant: DEFAULT_INITIAL_GRANT,
            forward_loan: DEFAULT_FORWARD_LOAN,
            transfer_loan: DEFAULT_TRANSFER_LOAN,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            auto_migrate: false,
            materialized_retention: DEFAULT_EXPIRY * 2,
            incoming_timeout: DEFAULT_EXPIRY,
        }
    }
}

impl NodeConfig {
    /// Interval between keepalives for borrowed weight.
    #[must_use]
    pub fn keepalive_interval(&self) -> Duration {
        self.expiry / 2
    }

    /// Sets the expiry window, rescaling the retention windows that derive from it.
    #[must_use]
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.expiry = expiry;
        self.materialized_retention = expiry * 2;
        self.incoming_timeout = expiry;
        self
    }

    /// Sets the weight minted per grant.
    #[must_use]
    pub const fn with_initial_grant(mut self, grant: Weight) -> Self {
        self.initial_grant = grant;
        self
    }

    /// Enables or disables automatic relocation.
    #[must_use]
    pub const fn with_auto_migrate(mut self, enabled: bool) -> Self {
        self.auto_migrate = enabled;
        self
    }

    /// Sets the redirect bound.
    #[must_use]
    pub const fn with_max_redirects(mut self, hops: usize) -> Self {
        self.max_redirects = hops;
        self
    }
}
