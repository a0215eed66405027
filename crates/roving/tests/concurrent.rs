//! Integration tests for handles used from several threads at once.
//!
//! Calls, transfers and migrations race on the same object; afterwards the
//! object must hold every update and the weight must still balance.

mod common;

use std::sync::Barrier;
use std::thread;

use common::{cluster, weight_sum, Counter, GRANT};

const CALLS: i64 = 200;

/// Callers on every node keep working while the host migrates the object.
#[test]
fn test_calls_race_a_migration() {
    let (network, nodes) = cluster(&["a", "b", "c"]);
    let (a, b, c) = (&nodes[0], &nodes[1], &nodes[2]);

    let counter = a.export(Counter::default());
    let id = counter.id().clone();
    let at_b = b
        .materialize::<Counter>(counter.transfer_to(b.address()).unwrap())
        .unwrap();
    let at_c = c
        .materialize::<Counter>(counter.transfer_to(c.address()).unwrap())
        .unwrap();
    let at_a = counter.clone();
    let barrier = Barrier::new(4);

    thread::scope(|scope| {
        for handle in [&at_a, &at_b, &at_c] {
            let barrier = &barrier;
            scope.spawn(move || {
                barrier.wait();
                for _ in 0..CALLS {
                    let _: i64 = handle.call("add", &1).unwrap();
                }
            });
        }
        scope.spawn(|| {
            barrier.wait();
            counter.migrate_to(b.address()).unwrap();
        });
    });

    let total: i64 = at_c.call("get", &()).unwrap();
    assert_eq!(total, 3 * CALLS);
    assert!(at_b.is_local());
    assert_eq!(at_b.with_local(Counter::value), Some(3 * CALLS));
    assert!(b.hosts(&id));
    assert!(!a.hosts(&id));

    assert!(network.settle());
    assert_eq!(weight_sum(&nodes, &id), 0);

    drop((counter, at_a, at_b, at_c));
    assert!(network.settle());
    for node in &nodes {
        assert_eq!(node.open_claims(), 0);
        assert_eq!(node.tracked_objects(), 0);
    }
}

/// A holder hands references back to the host from several threads while
/// other threads call through the same placement.
#[test]
fn test_transfers_and_calls_share_a_placement() {
    const THREADS: i64 = 4;
    const TRANSFERS: i64 = 50;

    let (network, nodes) = cluster(&["a", "b"]);
    let (a, b) = (&nodes[0], &nodes[1]);

    let counter = a.export(Counter::default());
    let at_b = b
        .materialize::<Counter>(counter.transfer_to(b.address()).unwrap())
        .unwrap();

    thread::scope(|scope| {
        for _ in 0..THREADS {
            scope.spawn(|| {
                for _ in 0..TRANSFERS {
                    let transfer = at_b.transfer_to(a.address()).unwrap();
                    let back = a.materialize::<Counter>(transfer).unwrap();
                    assert!(back.is_local());
                }
            });
            scope.spawn(|| {
                for _ in 0..TRANSFERS {
                    let _: i64 = at_b.call("add", &1).unwrap();
                }
            });
        }
    });

    assert_eq!(counter.with_local(Counter::value), Some(THREADS * TRANSFERS));
    assert_eq!(at_b.weight(), GRANT - THREADS * TRANSFERS);
    assert!(network.settle());
    assert_eq!(weight_sum(&nodes, counter.id()), 0);
}
