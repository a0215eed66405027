//! Invocation benchmarks: local calls, forwarded calls, and calls that are
//! redirected once after a migration.

use std::hint::black_box;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use roving::{remote_methods, InvokeError, KindMarshaller, LocalNetwork, Node};
use serde::{Deserialize, Serialize};

#[derive(Default, Serialize, Deserialize)]
struct Tally {
    hits: AtomicU64,
}

#[remote_methods]
impl Tally {
    pub fn hit(&self, _args: &[u8]) -> Result<Vec<u8>, InvokeError> {
        let hits = self.hits.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(hits.to_le_bytes().to_vec())
    }
}

fn pair() -> (LocalNetwork, Node, Node) {
    let marshaller = Arc::new(KindMarshaller::new());
    marshaller.register::<Tally>();
    let network = LocalNetwork::new();
    let a = network.add_node(Node::builder("a").marshaller(marshaller.clone()));
    let b = network.add_node(Node::builder("b").marshaller(marshaller));
    (network, a, b)
}

fn bench_local(c: &mut Criterion) {
    let (_network, a, _b) = pair();
    let tally = a.export(Tally::default());
    c.bench_function("invoke_local", |b| {
        b.iter(|| black_box(tally.invoke("hit", b"").unwrap()));
    });
}

fn bench_forwarded(c: &mut Criterion) {
    let (_network, a, b) = pair();
    let tally = a.export(Tally::default());
    let remote = b
        .materialize::<Tally>(tally.transfer_to(b.address()).unwrap())
        .unwrap();
    c.bench_function("invoke_forwarded", |bench| {
        bench.iter(|| black_box(remote.invoke("hit", b"").unwrap()));
    });
}

fn bench_redirected(c: &mut Criterion) {
    c.bench_function("invoke_after_migration", |bench| {
        bench.iter_batched(
            || {
                let (network, a, b) = pair();
                let tally = a.export(Tally::default());
                let remote = b
                    .materialize::<Tally>(tally.transfer_to(b.address()).unwrap())
                    .unwrap();
                let c = network.add_node(Node::builder("c").marshaller({
                    let marshaller = Arc::new(KindMarshaller::new());
                    marshaller.register::<Tally>();
                    marshaller
                }));
                tally.migrate_to(c.address()).unwrap();
                (network, a, b, c, tally, remote)
            },
            |(_network, _a, _b, _c, _tally, remote)| black_box(remote.invoke("hit", b"").unwrap()),
            criterion::BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_local, bench_forwarded, bench_redirected);
criterion_main!(benches);
