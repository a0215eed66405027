//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use roving::{
    remote_methods, InvokeError, KindMarshaller, LocalNetwork, Node, NodeConfig, ObjectId, Weight,
};
use serde::{Deserialize, Serialize};

/// A counter that can migrate.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Counter {
    value: AtomicI64,
}

#[remote_methods]
impl Counter {
    pub fn add(&self, args: &[u8]) -> Result<Vec<u8>, InvokeError> {
        let delta: i64 =
            serde_json::from_slice(args).map_err(|err| InvokeError::BadArguments(err.to_string()))?;
        let value = self.value.fetch_add(delta, Ordering::SeqCst) + delta;
        encode(&value)
    }

    pub fn get(&self, _args: &[u8]) -> Result<Vec<u8>, InvokeError> {
        encode(&self.value.load(Ordering::SeqCst))
    }

    pub fn fail(&self, _args: &[u8]) -> Result<Vec<u8>, InvokeError> {
        Err(InvokeError::Failed("counter refused".into()))
    }
}

impl Counter {
    pub fn with_value(value: i64) -> Self {
        Self {
            value: AtomicI64::new(value),
        }
    }

    pub fn value(&self) -> i64 {
        self.value.load(Ordering::SeqCst)
    }
}

fn encode(value: &i64) -> Result<Vec<u8>, InvokeError> {
    serde_json::to_vec(value).map_err(|err| InvokeError::Failed(err.to_string()))
}

pub fn marshaller() -> Arc<KindMarshaller> {
    let marshaller = Arc::new(KindMarshaller::new());
    marshaller.register::<Counter>();
    marshaller
}

/// Builds one node per name on a fresh network.
pub fn cluster(names: &[&str]) -> (LocalNetwork, Vec<Node>) {
    cluster_with(NodeConfig::default(), names)
}

pub fn cluster_with(config: NodeConfig, names: &[&str]) -> (LocalNetwork, Vec<Node>) {
    let network = LocalNetwork::new();
    let marshaller = marshaller();
    let nodes = names
        .iter()
        .map(|name| {
            network.add_node(
                Node::builder(*name)
                    .config(config.clone())
                    .marshaller(marshaller.clone()),
            )
        })
        .collect();
    (network, nodes)
}

/// Sum of every weight contribution for `object` across `nodes`.
pub fn weight_sum(nodes: &[Node], object: &ObjectId) -> Weight {
    nodes
        .iter()
        .flat_map(Node::ledger)
        .filter(|entry| &entry.object == object)
        .map(|entry| entry.weight)
        .sum()
}

pub const GRANT: Weight = 1 << 32;
