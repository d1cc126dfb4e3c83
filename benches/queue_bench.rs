//! Benchmarks for the staging queues and the monitor formatting.
//!
//! Benchmarks cover:
//! - RingQueue offer/poll
//! - SpilloverQueue offer/poll with and without spilling to disk
//! - Throughput formatting

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;

use prometheus_bulk_runner::core::monitor::format_transactions_per_second;
use prometheus_bulk_runner::infra::queue::{RingQueue, SpilloverQueue};

// ============================================================================
// Helper Functions
// ============================================================================

fn identifiers(count: u64) -> Vec<String> {
    (0..count).map(|i| format!("/documents/{i:08}.xml")).collect()
}

// ============================================================================
// Queue Benchmarks
// ============================================================================

fn bench_ring_offer_poll(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_offer_poll");

    for size in [1_000u64, 10_000, 100_000] {
        let items = identifiers(size);
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &items, |b, items| {
            b.iter(|| {
                let mut queue = RingQueue::new(items.len());
                for item in items {
                    let _ = queue.offer(item.clone());
                }
                while let Some(item) = queue.poll() {
                    black_box(item);
                }
            });
        });
    }

    group.finish();
}

fn bench_spillover_in_memory(c: &mut Criterion) {
    let mut group = c.benchmark_group("spillover_in_memory");
    let dir = tempfile::tempdir().expect("Failed to create temp dir");

    for size in [1_000u64, 10_000] {
        let items = identifiers(size);
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &items, |b, items| {
            b.iter(|| {
                let mut queue = SpilloverQueue::new(items.len(), dir.path()).expect("Failed to create queue");
                for item in items {
                    queue.offer(item.clone()).expect("Failed to offer");
                }
                while let Some(item) = queue.poll().expect("Failed to poll") {
                    black_box(item);
                }
            });
        });
    }

    group.finish();
}

fn bench_spillover_to_disk(c: &mut Criterion) {
    let mut group = c.benchmark_group("spillover_to_disk");
    group.sample_size(20);
    let dir = tempfile::tempdir().expect("Failed to create temp dir");

    for size in [1_000u64, 10_000] {
        let items = identifiers(size);
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &items, |b, items| {
            b.iter(|| {
                // A small memory budget forces most entries through the file.
                let mut queue = SpilloverQueue::new(64, dir.path()).expect("Failed to create queue");
                for item in items {
                    queue.offer(item.clone()).expect("Failed to offer");
                }
                while let Some(item) = queue.poll().expect("Failed to poll") {
                    black_box(item);
                }
                queue.close().expect("Failed to close queue");
            });
        });
    }

    group.finish();
}

// ============================================================================
// Monitor Benchmarks
// ============================================================================

fn bench_format_tps(c: &mut Criterion) {
    c.bench_function("format_transactions_per_second", |b| {
        b.iter(|| {
            for rate in [0.54321, 5.4321, 100.999, 54_321.0, 1_234_567.8] {
                black_box(format_transactions_per_second(black_box(rate)));
            }
        });
    });
}

criterion_group!(
    benches,
    bench_ring_offer_poll,
    bench_spillover_in_memory,
    bench_spillover_to_disk,
    bench_format_tps
);
criterion_main!(benches);
