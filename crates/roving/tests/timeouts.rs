//! Integration tests for keepalives and forced expiry.

mod common;

use std::time::{Duration, Instant};

use common::{cluster, weight_sum, Counter, GRANT};
use roving::{Error, OwnershipKey, RemoteError, Request, DEFAULT_EXPIRY};

const PAST_EXPIRY: Duration = Duration::from_secs(DEFAULT_EXPIRY.as_secs() + 1);
const PAST_KEEPALIVE: Duration = Duration::from_secs(DEFAULT_EXPIRY.as_secs() / 2 + 1);

/// A silent holder's claim expires and the host can reclaim the object.
#[test]
fn test_silent_claim_expires() {
    let (_network, nodes) = cluster(&["a", "b"]);
    let (a, b) = (&nodes[0], &nodes[1]);

    let counter = a.export(Counter::default());
    let id = counter.id().clone();
    let remote = b
        .materialize::<Counter>(counter.transfer_to(b.address()).unwrap())
        .unwrap();
    drop(counter);
    assert_eq!(a.tracked_objects(), 1);

    a.tick_at(Instant::now() + PAST_EXPIRY);
    assert_eq!(a.open_claims(), 0);
    assert_eq!(a.tracked_objects(), 0);
    assert_eq!(a.metrics().lifetimes_expired, 1);

    assert!(matches!(
        remote.invoke("get", b"null"),
        Err(Error::Remote(RemoteError::NoSuchObject(ref missing))) if *missing == id
    ));
}

/// Claims refreshed within the window survive a tick.
#[test]
fn test_fresh_claims_survive() {
    let (_network, nodes) = cluster(&["a", "b"]);
    let (a, b) = (&nodes[0], &nodes[1]);

    let counter = a.export(Counter::default());
    let _remote = b
        .materialize::<Counter>(counter.transfer_to(b.address()).unwrap())
        .unwrap();

    a.tick();
    assert_eq!(a.open_claims(), 1);
    assert_eq!(a.metrics().lifetimes_expired, 0);
}

/// Holders send keepalives once half the expiry window has passed.
#[test]
fn test_holders_send_keepalives() {
    let (_network, nodes) = cluster(&["a", "b"]);
    let (a, b) = (&nodes[0], &nodes[1]);

    let counter = a.export(Counter::default());
    let remote = b
        .materialize::<Counter>(counter.transfer_to(b.address()).unwrap())
        .unwrap();
    assert!(remote.manager().keepalive_armed());

    b.tick_at(Instant::now());
    assert_eq!(b.metrics().keepalives_sent, 0);

    b.tick_at(Instant::now() + PAST_KEEPALIVE);
    assert_eq!(b.metrics().keepalives_sent, 1);
    assert_eq!(a.open_claims(), 1);
}

/// Keepalives lost in transit let the claim expire; the next keepalive that
/// gets through reinstates it with the weight the holder still has.
#[test]
fn test_lost_keepalives_then_reinstatement() {
    let (network, nodes) = cluster(&["a", "b"]);
    let (a, b) = (&nodes[0], &nodes[1]);

    let counter = a.export(Counter::default());
    let remote = b
        .materialize::<Counter>(counter.transfer_to(b.address()).unwrap())
        .unwrap();
    let key = OwnershipKey::new(counter.id().clone(), b.address().clone());

    network.set_filter(|_, _, request| !matches!(request, Request::KeepAlive { .. }));
    let start = Instant::now();
    b.tick_at(start + PAST_KEEPALIVE);
    assert_eq!(b.metrics().send_failures, 1);

    a.tick_at(start + PAST_EXPIRY);
    assert_eq!(a.lifetime_outstanding(&key), None);
    assert_eq!(weight_sum(&nodes, counter.id()), GRANT);

    network.heal();
    b.tick_at(start + PAST_EXPIRY + PAST_KEEPALIVE);
    assert_eq!(a.lifetime_outstanding(&key), Some(-GRANT));
    assert_eq!(a.metrics().lifetimes_reinstated, 1);
    assert_eq!(weight_sum(&nodes, counter.id()), 0);

    let value: i64 = remote.call("add", &1).unwrap();
    assert_eq!(value, 1);
}

/// Returns for a claim that already expired are ignored.
#[test]
fn test_late_return_after_expiry_is_ignored() {
    let (_network, nodes) = cluster(&["a", "b"]);
    let (a, b) = (&nodes[0], &nodes[1]);

    let counter = a.export(Counter::default());
    let remote = b
        .materialize::<Counter>(counter.transfer_to(b.address()).unwrap())
        .unwrap();

    a.tick_at(Instant::now() + PAST_EXPIRY);
    assert_eq!(a.open_claims(), 0);

    drop(remote);
    b.flush();
    assert_eq!(a.open_claims(), 0);
    assert_eq!(a.metrics().weight_clamps, 0);
    assert!(counter.is_local());
}
