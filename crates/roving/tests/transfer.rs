//! Integration tests for one-shot transfers.

mod common;

use std::time::{Duration, Instant};

use common::{cluster, weight_sum, Counter, GRANT};
use roving::{Error, ReferenceTransfer, DEFAULT_EXPIRY};

fn copies(transfer: &ReferenceTransfer) -> (ReferenceTransfer, ReferenceTransfer) {
    let bytes = serde_json::to_vec(transfer).unwrap();
    (
        serde_json::from_slice(&bytes).unwrap(),
        serde_json::from_slice(&bytes).unwrap(),
    )
}

/// A replayed transfer is rejected and does not add weight.
#[test]
fn test_replayed_transfer_is_rejected() {
    let (_network, nodes) = cluster(&["a", "b"]);
    let (a, b) = (&nodes[0], &nodes[1]);

    let counter = a.export(Counter::default());
    let transfer = counter.transfer_to(b.address()).unwrap();
    let (first, replay) = copies(&transfer);
    drop(transfer);

    let id = first.id().clone();
    let remote = b.materialize::<Counter>(first).unwrap();
    let err = b.materialize::<Counter>(replay).unwrap_err();
    assert!(matches!(err, Error::AlreadyMaterialized(ref dup) if *dup == id));

    assert_eq!(remote.weight(), GRANT);
    assert_eq!(b.metrics().duplicate_transfers, 1);
    assert_eq!(b.metrics().transfers_materialized, 1);
    assert_eq!(weight_sum(&nodes, counter.id()), 0);
}

/// A replay stays rejected after the recipient prunes its log of seen ids.
#[test]
fn test_replay_after_pruning_is_rejected() {
    let (network, nodes) = cluster(&["a", "b"]);
    let (a, b) = (&nodes[0], &nodes[1]);

    let counter = a.export(Counter::default());
    let transfer = counter.transfer_to(b.address()).unwrap();
    let (first, replay) = copies(&transfer);
    drop(transfer);

    let remote = b.materialize::<Counter>(first).unwrap();
    b.tick_at(Instant::now() + DEFAULT_EXPIRY * 2 + Duration::from_secs(1));

    let err = b.materialize::<Counter>(replay).unwrap_err();
    assert!(matches!(err, Error::AlreadyMaterialized(_)));
    assert_eq!(remote.weight(), GRANT);
    assert!(network.settle());
    assert_eq!(weight_sum(&nodes, counter.id()), 0);

    // Transfers issued after the prune are still accepted.
    let again = b
        .materialize::<Counter>(counter.transfer_to(b.address()).unwrap())
        .unwrap();
    assert_eq!(again.weight(), GRANT * 2);
    assert_eq!(weight_sum(&nodes, counter.id()), 0);
}

/// Only the named recipient may materialize a transfer.
#[test]
fn test_wrong_recipient_is_rejected() {
    let (_network, nodes) = cluster(&["a", "b", "c"]);
    let (a, b, c) = (&nodes[0], &nodes[1], &nodes[2]);

    let counter = a.export(Counter::default());
    let transfer = counter.transfer_to(b.address()).unwrap();
    let (misdelivered, delivered) = copies(&transfer);

    let err = c.materialize::<Counter>(misdelivered).unwrap_err();
    assert!(matches!(
        err,
        Error::WrongRecipient { ref expected, ref actual, .. }
            if expected == b.address() && actual == c.address()
    ));
    assert_eq!(c.tracked_objects(), 0);

    // The rejection does not burn the transfer for its real recipient.
    let remote = b.materialize::<Counter>(delivered).unwrap();
    assert_eq!(remote.weight(), GRANT);
}

/// A host can hand itself a weightless reference.
#[test]
fn test_self_transfer_is_weightless() {
    let (_network, nodes) = cluster(&["a"]);
    let a = &nodes[0];

    let counter = a.export(Counter::default());
    let transfer = counter.transfer_to(a.address()).unwrap();
    assert_eq!(transfer.weight(), 0);
    assert!(transfer.source().is_none());

    let again = a.materialize::<Counter>(transfer).unwrap();
    assert!(std::sync::Arc::ptr_eq(again.manager(), counter.manager()));
    assert_eq!(a.open_claims(), 0);
}

/// Transfers for objects the host no longer tracks fail cleanly.
#[test]
fn test_transfer_for_forgotten_object() {
    let (_network, nodes) = cluster(&["a"]);
    let a = &nodes[0];

    let counter = a.export(Counter::default());
    let transfer = counter.transfer_to(a.address()).unwrap();
    drop(counter);

    assert!(matches!(
        a.materialize::<Counter>(transfer),
        Err(Error::NoSuchObject(_))
    ));
}

/// Transfers survive the wire unchanged.
#[test]
fn test_transfer_round_trips_through_json() {
    let (_network, nodes) = cluster(&["a", "b"]);
    let (a, b) = (&nodes[0], &nodes[1]);

    let counter = a.export(Counter::default());
    let transfer = counter.transfer_to(b.address()).unwrap();
    let json = serde_json::to_string(&transfer).unwrap();
    let decoded: ReferenceTransfer = serde_json::from_str(&json).unwrap();

    assert_eq!(decoded, transfer);
    assert_eq!(decoded.object(), counter.id());
    assert_eq!(decoded.claimant(), b.address());
    assert_eq!(decoded.id().issuer(), a.address());
}
