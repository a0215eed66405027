//! In-process transport.
//!
//! [`LocalNetwork`] delivers every request synchronously by calling the
//! recipient's [`Node::on_message_arrived`] on the sender's thread. It is
//! meant for tests and single-process deployments and supports the fault
//! injection the protocol has to survive: links can be cut and individual
//! requests can be dropped by a filter.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::error::TransportError;
use crate::id::NodeAddress;
use crate::message::{Envelope, Request, Response};
use crate::node::{Node, NodeBuilder, NodeContext};
use crate::transport::Transport;

/// Decides whether a request from the first address to the second is
/// delivered. Returning `false` drops it.
pub type RequestFilter = dyn Fn(&NodeAddress, &NodeAddress, &Request) -> bool + Send + Sync;

/// Rounds of flushing [`LocalNetwork::settle`] attempts before giving up.
const SETTLE_ROUNDS: usize = 64;

#[derive(Default)]
struct NetworkInner {
    nodes: RwLock<HashMap<NodeAddress, Weak<NodeContext>>>,
    blocked: RwLock<HashSet<(NodeAddress, NodeAddress)>>,
    filter: RwLock<Option<Box<RequestFilter>>>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// A set of nodes in one process, connected by direct calls.
///
/// Nodes are held weakly: dropping the last [`Node`] clone shuts the node
/// down, after which requests to it fail with [`TransportError::Closed`].
/// Requests to an address that was never added, or was disconnected, fail
/// with [`TransportError::Unreachable`].
#[derive(Clone, Default)]
pub struct LocalNetwork {
    inner: Arc<NetworkInner>,
}

impl LocalNetwork {
    /// Creates an empty network.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the node described by `builder` on this network.
    ///
    /// A node already registered under the same address is replaced.
    pub fn add_node(&self, builder: NodeBuilder) -> Node {
        let node = builder.build(Arc::new(self.clone()));
        self.inner
            .nodes
            .write()
            .insert(node.address().clone(), node.downgrade());
        node
    }

    /// Looks up a live node by address.
    #[must_use]
    pub fn node(&self, address: &NodeAddress) -> Option<Node> {
        self.inner
            .nodes
            .read()
            .get(address)
            .and_then(Weak::upgrade)
            .map(Node::from_context)
    }

    /// Every live node on the network.
    #[must_use]
    pub fn nodes(&self) -> Vec<Node> {
        self.inner
            .nodes
            .read()
            .values()
            .filter_map(Weak::upgrade)
            .map(Node::from_context)
            .collect()
    }

    /// Takes `address` off the network without dropping the node, as if it
    /// crashed. The node can still send.
    pub fn disconnect(&self, address: &NodeAddress) {
        self.inner.nodes.write().remove(address);
    }

    /// Cuts the link between `a` and `b` in both directions.
    pub fn block(&self, a: &NodeAddress, b: &NodeAddress) {
        let mut blocked = self.inner.blocked.write();
        blocked.insert((a.clone(), b.clone()));
        blocked.insert((b.clone(), a.clone()));
    }

    /// Restores the link between `a` and `b`.
    pub fn unblock(&self, a: &NodeAddress, b: &NodeAddress) {
        let mut blocked = self.inner.blocked.write();
        blocked.remove(&(a.clone(), b.clone()));
        blocked.remove(&(b.clone(), a.clone()));
    }

    /// Installs `filter`, replacing any previous one.
    pub fn set_filter<F>(&self, filter: F)
    where
        F: Fn(&NodeAddress, &NodeAddress, &Request) -> bool + Send + Sync + 'static,
    {
        *self.inner.filter.write() = Some(Box::new(filter));
    }

    /// Removes the request filter.
    pub fn clear_filter(&self) {
        *self.inner.filter.write() = None;
    }

    /// Restores every link and removes the filter.
    pub fn heal(&self) {
        self.inner.blocked.write().clear();
        self.clear_filter();
    }

    /// Flushes every node until no one-way message is pending anywhere.
    ///
    /// Returns `false` if messages were still pending after a bounded number
    /// of rounds, e.g. because delivery keeps failing and being re-queued.
    pub fn settle(&self) -> bool {
        for _ in 0..SETTLE_ROUNDS {
            let nodes = self.nodes();
            if nodes.iter().all(|node| node.pending() == 0) {
                return true;
            }
            for node in &nodes {
                node.flush();
            }
        }
        self.nodes().iter().all(|node| node.pending() == 0)
    }

    /// Requests delivered so far.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.inner.delivered.load(Ordering::Relaxed)
    }

    /// Requests dropped by blocked links or the filter.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    fn admits(&self, from: &NodeAddress, to: &NodeAddress, request: &Request) -> bool {
        if self
            .inner
            .blocked
            .read()
            .contains(&(from.clone(), to.clone()))
        {
            return false;
        }
        self.inner
            .filter
            .read()
            .as_ref()
            .map_or(true, |filter| filter(from, to, request))
    }
}

impl Transport for LocalNetwork {
    fn send(&self, to: &NodeAddress, envelope: Envelope) -> Result<Response, TransportError> {
        if !self.admits(&envelope.from, to, &envelope.request) {
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(TransportError::Dropped { to: to.clone() });
        }
        let node = match self.inner.nodes.read().get(to) {
            Some(weak) => weak.upgrade().ok_or(TransportError::Closed)?,
            None => return Err(TransportError::Unreachable(to.clone())),
        };
        let node = Node::from_context(node);
        self.inner.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(node.on_message_arrived(envelope))
    }
}

impl std::fmt::Debug for LocalNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let nodes: Vec<NodeAddress> = self.inner.nodes.read().keys().cloned().collect();
        f.debug_struct("LocalNetwork")
            .field("nodes", &nodes)
            .field("blocked", &self.inner.blocked.read().len())
            .field("filtered", &self.inner.filter.read().is_some())
            .field("delivered", &self.delivered())
            .finish()
    }
}
