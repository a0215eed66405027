//! Tokio integration.
//!
//! Enabled by the `tokio` feature:
//!
//! ```toml
//! [dependencies]
//! roving = { version = "0.3", features = ["tokio"] }
//! ```
//!
//! [`spawn_ticker`] drives [`Node::tick`] from a tokio task instead of the
//! dedicated thread used by [`Driver`](crate::Driver).

use std::time::Duration;

use ::tokio::task::{self, JoinHandle};
use ::tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::node::Node;

/// Spawns a task that ticks `node` every `period` until `cancel` fires or
/// the node is dropped.
///
/// Ticks may deliver messages synchronously, so each one runs on the
/// blocking pool. Must be called from within a tokio runtime.
///
/// ```ignore
/// let cancel = CancellationToken::new();
/// let ticker = roving::tokio::spawn_ticker(&node, Duration::from_secs(1), cancel.clone());
/// // ...
/// cancel.cancel();
/// ticker.await?;
/// ```
pub fn spawn_ticker(node: &Node, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    let weak = node.downgrade();
    task::spawn(async move {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ::tokio::select! {
                () = cancel.cancelled() => return,
                _ = interval.tick() => {}
            }
            let Some(context) = weak.upgrade() else {
                return;
            };
            let node = Node::from_context(context);
            if task::spawn_blocking(move || node.tick()).await.is_err() {
                return;
            }
        }
    })
}
