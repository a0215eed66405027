//! Integration tests for protocol tracing.
//!
//! These tests capture formatted events on the current thread and check that
//! the protocol reports its notable transitions.

#![cfg(feature = "tracing")]

mod common;

use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use common::{cluster, Counter};
use roving::{ReferenceTransfer, DEFAULT_EXPIRY};

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn capture<F: FnOnce()>(f: F) -> String {
    let capture = Capture::default();
    let writer = capture.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    tracing::subscriber::with_default(subscriber, f);
    capture.contents()
}

#[test]
fn test_migration_is_logged() {
    let logs = capture(|| {
        let (_network, nodes) = cluster(&["a", "b"]);
        let counter = nodes[0].export(Counter::default());
        counter.migrate_to(nodes[1].address()).unwrap();
    });

    assert!(logs.contains("roving.migrate"), "{logs}");
    assert!(logs.contains("migration committed"), "{logs}");
    assert!(logs.contains("migrated object installed"), "{logs}");
}

#[test]
fn test_weight_flow_is_logged() {
    let logs = capture(|| {
        let (_network, nodes) = cluster(&["a", "b"]);
        let counter = nodes[0].export(Counter::default());
        let remote = nodes[1]
            .materialize::<Counter>(counter.transfer_to(nodes[1].address()).unwrap())
            .unwrap();
        drop(remote);
        nodes[1].flush();
    });

    assert!(logs.contains("weight_minted"), "{logs}");
    assert!(logs.contains("weight_retired"), "{logs}");
    assert!(logs.contains("message_received"), "{logs}");
}

#[test]
fn test_expiry_is_logged_as_warning() {
    let logs = capture(|| {
        let (_network, nodes) = cluster(&["a", "b"]);
        let counter = nodes[0].export(Counter::default());
        let _remote = nodes[1]
            .materialize::<Counter>(counter.transfer_to(nodes[1].address()).unwrap())
            .unwrap();
        nodes[0].tick_at(Instant::now() + DEFAULT_EXPIRY + Duration::from_secs(1));
    });

    assert!(logs.contains("WARN"), "{logs}");
    assert!(logs.contains("forcing expiry"), "{logs}");
}

#[test]
fn test_replayed_transfer_is_logged() {
    let logs = capture(|| {
        let (_network, nodes) = cluster(&["a", "b"]);
        let counter = nodes[0].export(Counter::default());
        let transfer = counter.transfer_to(nodes[1].address()).unwrap();
        let bytes = serde_json::to_vec(&transfer).unwrap();
        let replay: ReferenceTransfer = serde_json::from_slice(&bytes).unwrap();
        let _remote = nodes[1].materialize::<Counter>(transfer).unwrap();
        assert!(nodes[1].materialize::<Counter>(replay).is_err());
    });

    assert!(logs.contains("transfer materialized twice"), "{logs}");
}
