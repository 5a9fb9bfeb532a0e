//! Version chain benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ssidb_bench::utils::{deep_chain, random_data, BENCH_VIEW};
use ssidb_core::{DataContainer, EntryCreationVersion, Key, ReadWindowVersion};

/// Benchmark snapshot lookups at the head and deep in the chain.
fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup");

    for depth in [1i64, 16, 256] {
        let (container, key) = deep_chain(depth, 64);
        let head = ReadWindowVersion::new(BENCH_VIEW, 0, depth, false);
        let oldest = ReadWindowVersion::new(BENCH_VIEW, 0, 1, false);

        group.bench_with_input(BenchmarkId::new("head", depth), &depth, |b, _| {
            b.iter(|| black_box(container.read(black_box(&key), Some(&head), 0)));
        });
        group.bench_with_input(BenchmarkId::new("oldest", depth), &depth, |b, _| {
            b.iter(|| black_box(container.read(black_box(&key), Some(&oldest), 0)));
        });
    }

    group.finish();
}

/// Benchmark appending committed versions.
fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("append");
    group.throughput(Throughput::Elements(1));

    group.bench_function("single_key", |b| {
        let container = DataContainer::new(16);
        let key = Key::from("hot");
        let payload = random_data(64);
        let mut version = 0;
        b.iter(|| {
            version += 1;
            container
                .write(
                    &key,
                    Some(payload.clone()),
                    Some(EntryCreationVersion::new(BENCH_VIEW, 0, version, 0, vec![version])),
                    false,
                    None,
                )
                .unwrap();
        });
    });

    group.finish();
}

/// Benchmark garbage collection of a deep chain.
fn bench_gc(c: &mut Criterion) {
    c.bench_function("gc_256", |b| {
        b.iter_batched(
            || deep_chain(256, 16),
            |(container, key)| {
                let min = ssidb_core::DistributedVersion::new(BENCH_VIEW, vec![256]);
                black_box(container.garbage_collect(
                    ssidb_core::LogPosition::new(255, 0),
                    &min,
                    0,
                ));
                black_box(key);
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_lookup, bench_append, bench_gc);
criterion_main!(benches);
