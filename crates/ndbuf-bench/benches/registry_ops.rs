//! Criterion micro-benchmarks for the deallocator registry and the
//! diagnostic stores.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use ndbuf_registry::DeallocatorRegistry;
use ndbuf_stats::{AllocationCounters, TimingHolder};
use ndbuf_test_utils::{Behaviour, TestWrapper};

fn bench_register_and_reap_now(c: &mut Criterion) {
    let registry = DeallocatorRegistry::new();
    c.bench_function("register_and_reap_now", |b| {
        b.iter(|| {
            let (w, _fired) = TestWrapper::new(registry.next_value(), Behaviour::Succeed);
            let id = registry.register(&w).unwrap();
            black_box(registry.reap_now(id));
        });
    });
}

fn bench_poll_10k_dead(c: &mut Criterion) {
    c.bench_function("poll_and_reap_10k_dead", |b| {
        b.iter_batched(
            || {
                let registry = DeallocatorRegistry::new();
                for _ in 0..10_000 {
                    let (w, _fired) = TestWrapper::new(registry.next_value(), Behaviour::Succeed);
                    registry.register(&w).unwrap();
                }
                registry
            },
            |registry| black_box(registry.poll_and_reap()),
            BatchSize::LargeInput,
        );
    });
}

fn bench_poll_10k_live(c: &mut Criterion) {
    let registry = DeallocatorRegistry::new();
    let held: Vec<_> = (0..10_000)
        .map(|_| {
            let (w, _fired) = TestWrapper::new(registry.next_value(), Behaviour::Succeed);
            registry.register(&w).unwrap();
            w
        })
        .collect();
    c.bench_function("poll_and_reap_10k_live", |b| {
        b.iter(|| black_box(registry.poll_and_reap()));
    });
    drop(held);
}

fn bench_counter_increment(c: &mut Criterion) {
    let counters = AllocationCounters::new();
    counters.increment("allocations");
    c.bench_function("counter_increment_existing", |b| {
        b.iter(|| black_box(counters.increment("allocations")));
    });
}

fn bench_timing_median(c: &mut Criterion) {
    let timings: TimingHolder = TimingHolder::new();
    for i in 0..10_000u64 {
        timings.add("allocate".to_string(), i * 7 % 1_000);
    }
    let key = "allocate".to_string();
    c.bench_function("timing_median_10k", |b| {
        b.iter(|| black_box(timings.median(&key)));
    });
}

criterion_group!(
    benches,
    bench_register_and_reap_now,
    bench_poll_10k_dead,
    bench_poll_10k_live,
    bench_counter_increment,
    bench_timing_median
);
criterion_main!(benches);
