//! End-to-end transaction benchmarks over the loopback transport.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use ssidb_bench::utils::random_data;
use ssidb_core::{CoreConfig, Key, OrderingMode, ValidationMode};
use ssidb_testkit::TestCluster;

/// Benchmark single-node and cross-node commits.
fn bench_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit");
    group.throughput(Throughput::Elements(1));

    let configs = [
        ("ssi", CoreConfig::default()),
        (
            "plain",
            CoreConfig::default().validation_mode(ValidationMode::Plain),
        ),
        (
            "ssi_total_order",
            CoreConfig::default().ordering_mode(OrderingMode::TotalOrder),
        ),
    ];

    for (name, config) in configs {
        let cluster = TestCluster::two_node_with(config);
        let coordinator = cluster.coordinator(0);
        let payload = random_data(64);

        group.bench_function(format!("{name}/local"), |b| {
            b.iter(|| {
                let mut tx = coordinator.begin().unwrap();
                coordinator.write(&mut tx, Key::from("x"), payload.clone()).unwrap();
                black_box(coordinator.commit(&mut tx).unwrap());
            });
        });

        group.bench_function(format!("{name}/cross_node"), |b| {
            b.iter(|| {
                let mut tx = coordinator.begin().unwrap();
                coordinator.read(&mut tx, &Key::from("y")).unwrap();
                coordinator.write(&mut tx, Key::from("x"), payload.clone()).unwrap();
                coordinator.write(&mut tx, Key::from("y"), payload.clone()).unwrap();
                black_box(coordinator.commit(&mut tx).unwrap());
            });
        });

        cluster.collect_garbage();
    }

    group.finish();
}

/// Benchmark read-only snapshot transactions.
fn bench_read_only(c: &mut Criterion) {
    let cluster = TestCluster::two_node();
    cluster.commit_writes(0, &[("x", "1"), ("y", "1")]).unwrap();
    let coordinator = cluster.coordinator(0);

    c.bench_function("read_only_two_keys", |b| {
        b.iter(|| {
            let mut tx = coordinator.begin().unwrap();
            black_box(coordinator.read(&mut tx, &Key::from("x")).unwrap());
            black_box(coordinator.read(&mut tx, &Key::from("y")).unwrap());
            black_box(coordinator.commit(&mut tx).unwrap());
        });
    });
}

criterion_group!(benches, bench_commit, bench_read_only);
criterion_main!(benches);
