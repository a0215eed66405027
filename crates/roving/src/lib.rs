//! Migratable remote objects with distributed garbage collection.
//!
//! `roving` lets a group of nodes share objects by reference. Each object has
//! one canonical copy on its *host*; every other node reaches it through a
//! [`Handle`] that forwards calls. Objects can move between nodes while
//! references to them are in use, and an object is reclaimed once no node
//! references it any more.
//!
//! # How it works
//!
//! - **Weighted references.** A host lends *weight* to every node that holds a
//!   reference and tracks the outstanding total per claimant. Copying a
//!   reference to a third node is paid for with weight, so the host never has
//!   to be told about copies. When all weight is back, the host's bookkeeping
//!   for the object disappears.
//! - **Timestamped locations.** Each migration bumps the object's location
//!   version. Nodes keep the newest location they have heard of and send
//!   weight minted at older locations back where it came from.
//! - **Two-phase migration.** `prepare` switches the object to forwarding
//!   storage, `commit` ships its state and waits for in-flight local calls,
//!   `conclude` restores direct storage on the new host.
//! - **Timeouts.** Holders re-announce their weight with keepalives; a host
//!   that hears nothing for the expiry window forgets the claim.
//!
//! # Quick start
//!
//! ```ignore
//! use std::sync::atomic::{AtomicI64, Ordering};
//! use std::sync::Arc;
//!
//! use roving::{remote_methods, InvokeError, KindMarshaller, LocalNetwork, Node};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Default, Serialize, Deserialize)]
//! struct Counter {
//!     value: AtomicI64,
//! }
//!
//! #[remote_methods]
//! impl Counter {
//!     pub fn increment(&self, _args: &[u8]) -> Result<Vec<u8>, InvokeError> {
//!         let value = self.value.fetch_add(1, Ordering::SeqCst) + 1;
//!         Ok(serde_json::to_vec(&value).unwrap_or_default())
//!     }
//! }
//!
//! let marshaller = Arc::new(KindMarshaller::new());
//! marshaller.register::<Counter>();
//!
//! let network = LocalNetwork::new();
//! let a = network.add_node(Node::builder("a").marshaller(marshaller.clone()));
//! let b = network.add_node(Node::builder("b").marshaller(marshaller));
//!
//! let counter = a.export(Counter::default());
//! let remote = b.materialize::<Counter>(counter.transfer_to(b.address())?)?;
//! let value: i64 = remote.call("increment", &())?;
//!
//! counter.migrate_to(b.address())?;
//! assert!(remote.is_local());
//! ```
//!
//! # Feature flags
//!
//! - `derive` (default): the [`remote_methods`] attribute.
//! - `tracing` (default): structured protocol logging through `tracing`.
//! - `tokio`: [`tokio::spawn_ticker`] for driving maintenance from a runtime.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

extern crate self as roving;

mod config;
mod driver;
mod error;
mod handle;
mod id;
mod lifetime;
mod local;
mod location;
mod message;
mod metrics;
mod migration;
mod node;
mod outbox;
mod remotable;
mod transfer;
mod transport;
mod tracing;
mod trigger;

/// Tokio integration.
#[cfg(feature = "tokio")]
pub mod tokio;

pub use config::{
    NodeConfig, Weight, DEFAULT_EXPIRY, DEFAULT_FORWARD_LOAN, DEFAULT_INITIAL_GRANT,
    DEFAULT_MAX_REDIRECTS, DEFAULT_TRANSFER_LOAN,
};
pub use driver::Driver;
pub use error::{Error, InvokeError, MarshalError, MigrationError, RemoteError, TransportError};
pub use handle::Handle;
pub use id::{NodeAddress, ObjectId, OwnershipKey, TimestampedLocation, TransferId};
pub use local::{LocalNetwork, RequestFilter};
pub use location::{LocationManager, StorageMode};
pub use message::{Envelope, Request, Response};
pub use metrics::{MetricsSnapshot, ProtocolMetrics};
pub use migration::MigrationState;
pub use node::{LedgerEntry, Node, NodeBuilder};
pub use remotable::Remotable;
pub use transfer::ReferenceTransfer;
pub use transport::{KindMarshaller, Marshaller, Transport};
pub use trigger::ReferenceStrength;

#[cfg(feature = "derive")]
pub use roving_derive::remote_methods;
