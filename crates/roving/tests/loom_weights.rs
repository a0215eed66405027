//! Loom tests for weight accounting under concurrency.
//!
//! These model the two lock-free pieces of the weight protocol: the
//! lifetime counter that refuses to leave zero, and the placement pair that
//! is swapped as a unit.

use loom::sync::atomic::{AtomicI64, Ordering};
use loom::sync::{Arc, Mutex};

/// Lend unless the counter already reached zero, mirroring the lifetime
/// manager's refusal to resurrect.
fn lend(outstanding: &AtomicI64, amount: i64) -> bool {
    outstanding
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            if current == 0 {
                None
            } else {
                Some(current - amount)
            }
        })
        .is_ok()
}

/// Accept a return, clamping at zero. Returns whether the counter died.
fn accept_return(outstanding: &AtomicI64, amount: i64) -> Option<bool> {
    outstanding
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            if current == 0 {
                None
            } else {
                Some((current + amount).min(0))
            }
        })
        .ok()
        .map(|previous| (previous + amount).min(0) == 0)
}

/// A lend racing the final return either lands first or is refused.
#[test]
#[ignore = "loom test - run with cargo test loom_lend_vs_final_return --release"]
fn test_lend_vs_final_return() {
    loom::model(|| {
        let outstanding = Arc::new(AtomicI64::new(-2));

        let returner = loom::thread::spawn({
            let outstanding = Arc::clone(&outstanding);
            move || accept_return(&outstanding, 2)
        });

        let lender = loom::thread::spawn({
            let outstanding = Arc::clone(&outstanding);
            move || lend(&outstanding, 1)
        });

        let died = returner.join().unwrap();
        let lent = lender.join().unwrap();
        let last = outstanding.load(Ordering::Acquire);

        if lent {
            assert_eq!(died, Some(false));
            assert_eq!(last, -1);
        } else {
            assert_eq!(died, Some(true));
            assert_eq!(last, 0);
        }
    });
}

/// Two returns that together exceed the outstanding weight clamp at zero
/// and report death exactly once.
#[test]
#[ignore = "loom test - run with cargo test loom_concurrent_returns --release"]
fn test_concurrent_returns_die_once() {
    loom::model(|| {
        let outstanding = Arc::new(AtomicI64::new(-3));

        let handles: Vec<_> = [2, 2]
            .into_iter()
            .map(|amount| {
                let outstanding = Arc::clone(&outstanding);
                loom::thread::spawn(move || accept_return(&outstanding, amount))
            })
            .collect();

        let deaths = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|died| *died == Some(true))
            .count();

        assert_eq!(deaths, 1);
        assert_eq!(outstanding.load(Ordering::Acquire), 0);
    });
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct Placement {
    version: u64,
    weight: i64,
}

/// Compare-and-swap over a shared placement snapshot.
fn swap_placement(
    slot: &Mutex<std::sync::Arc<Placement>>,
    update: impl Fn(Placement) -> Option<Placement>,
) -> Option<Placement> {
    loop {
        let current = std::sync::Arc::clone(&slot.lock().unwrap());
        let next = update(*current)?;
        let mut guard = slot.lock().unwrap();
        if std::sync::Arc::ptr_eq(&guard, &current) {
            *guard = std::sync::Arc::new(next);
            return Some(*current);
        }
        drop(guard);
        loom::thread::yield_now();
    }
}

/// Borrowing and supplying weight on one placement never loses weight.
#[test]
#[ignore = "loom test - run with cargo test loom_placement_weight --release"]
fn test_placement_weight_is_conserved() {
    loom::model(|| {
        let slot = Arc::new(Mutex::new(std::sync::Arc::new(Placement {
            version: 1,
            weight: 4,
        })));

        let supplier = loom::thread::spawn({
            let slot = Arc::clone(&slot);
            move || {
                swap_placement(&slot, |p| {
                    Some(Placement {
                        weight: p.weight + 3,
                        ..p
                    })
                });
            }
        });

        let borrower = loom::thread::spawn({
            let slot = Arc::clone(&slot);
            move || {
                swap_placement(&slot, |p| {
                    (p.weight > 2).then_some(Placement {
                        weight: p.weight - 2,
                        ..p
                    })
                })
                .map_or(0, |_| 2)
            }
        });

        supplier.join().unwrap();
        let borrowed = borrower.join().unwrap();
        let last = slot.lock().unwrap().weight;

        assert_eq!(borrowed, 2);
        assert_eq!(last + borrowed, 7);
    });
}

/// A newer location replaces the placement as a unit; weight supplied for
/// the older one is not mixed in.
#[test]
#[ignore = "loom test - run with cargo test loom_placement_adopt --release"]
fn test_adopting_newer_location_is_atomic() {
    loom::model(|| {
        let slot = Arc::new(Mutex::new(std::sync::Arc::new(Placement {
            version: 1,
            weight: 4,
        })));
        let stale = Arc::new(AtomicI64::new(0));

        let adopter = loom::thread::spawn({
            let slot = Arc::clone(&slot);
            let stale = Arc::clone(&stale);
            move || {
                let previous = swap_placement(&slot, |_| {
                    Some(Placement {
                        version: 2,
                        weight: 5,
                    })
                });
                if let Some(previous) = previous {
                    stale.fetch_add(previous.weight, Ordering::AcqRel);
                }
            }
        });

        let supplier = loom::thread::spawn({
            let slot = Arc::clone(&slot);
            let stale = Arc::clone(&stale);
            move || {
                let applied = swap_placement(&slot, |p| {
                    (p.version == 1).then_some(Placement {
                        weight: p.weight + 1,
                        ..p
                    })
                });
                if applied.is_none() {
                    stale.fetch_add(1, Ordering::AcqRel);
                }
            }
        });

        adopter.join().unwrap();
        supplier.join().unwrap();

        let last = std::sync::Arc::clone(&slot.lock().unwrap());
        assert_eq!(*last, Placement { version: 2, weight: 5 });
        assert_eq!(stale.load(Ordering::Acquire), 5);
    });
}
