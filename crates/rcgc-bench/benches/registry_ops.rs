//! Criterion micro-benchmarks for tracking, sharing, and collecting handles.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use rcgc::{CollectorConfig, Heap, Registry, TrackedPointer};
use rcgc_bench::{replay, workload};
use rcgc_test_utils::DropCounter;

/// Benchmark: track and immediately drop 1K single values (eager policy).
fn bench_alloc_drop_1k(c: &mut Criterion) {
    let heap = Heap::new();
    c.bench_function("alloc_drop_1k", |b| {
        b.iter(|| {
            for i in 0..1_000u64 {
                let p = heap.alloc(i).unwrap();
                black_box(p.address());
            }
        });
    });
}

/// Benchmark: clone one handle 1K times, then drop every clone.
fn bench_clone_fan_out_1k(c: &mut Criterion) {
    let heap = Heap::new();
    let root = heap.alloc(7u64).unwrap();
    c.bench_function("clone_fan_out_1k", |b| {
        b.iter(|| {
            let clones: Vec<_> = (0..1_000).map(|_| root.clone()).collect();
            black_box(clones.len());
        });
    });
}

/// Benchmark: collect 1K unreferenced records in one manual pass, with
/// 1K survivors interleaved.
fn bench_manual_collect_1k(c: &mut Criterion) {
    c.bench_function("manual_collect_1k", |b| {
        b.iter_batched(
            || {
                let reg = Registry::new_shared(CollectorConfig::manual()).unwrap();
                let mut keep = Vec::with_capacity(1_000);
                for i in 0..2_000u64 {
                    let p: TrackedPointer<u64> = TrackedPointer::new(&reg, Box::new(i)).unwrap();
                    if i % 2 == 0 {
                        keep.push(p);
                    }
                }
                (reg, keep)
            },
            |(reg, keep)| {
                black_box(reg.collect());
                (reg, keep)
            },
            BatchSize::SmallInput,
        );
    });
}

/// Benchmark: walk a 10K-element array through a bounded cursor.
fn bench_cursor_walk_10k(c: &mut Criterion) {
    let heap = Heap::new();
    let p = heap.alloc_array((0..10_000u64).collect::<Vec<_>>()).unwrap();
    c.bench_function("cursor_walk_10k", |b| {
        b.iter(|| {
            let sum: u64 = p.begin().into_iter().sum();
            black_box(sum);
        });
    });
}

/// Benchmark: shutdown flush of 1K live drop-counted elements.
fn bench_flush_1k(c: &mut Criterion) {
    let counter = DropCounter::new();
    c.bench_function("flush_1k", |b| {
        b.iter_batched(
            || {
                let heap = Heap::new();
                let live: Vec<_> = (0..1_000)
                    .map(|id| heap.alloc(counter.probe(id)).unwrap())
                    .collect();
                (heap, live)
            },
            |(heap, live)| {
                black_box(heap.shutdown());
                (heap, live)
            },
            BatchSize::SmallInput,
        );
    });
}

/// Benchmark: replay a seeded 10K-operation workload under each policy.
fn bench_replay_10k(c: &mut Criterion) {
    let ops = workload(0x5eed, 10_000);
    c.bench_function("replay_10k_eager", |b| {
        b.iter(|| black_box(replay(&ops, CollectorConfig::default()).unwrap()));
    });
    c.bench_function("replay_10k_manual", |b| {
        b.iter(|| black_box(replay(&ops, CollectorConfig::manual()).unwrap()));
    });
}

criterion_group!(
    benches,
    bench_alloc_drop_1k,
    bench_clone_fan_out_1k,
    bench_manual_collect_1k,
    bench_cursor_walk_10k,
    bench_flush_1k,
    bench_replay_10k
);
criterion_main!(benches);
