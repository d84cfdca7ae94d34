//! Keyed lane throughput benchmarks
//!
//! Run with: cargo bench --bench lanes_benchmark

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use storehub::core::types::InboundEvent;
use storehub::dispatch::{KeyedLanes, LaneLimits};
use storehub::flow::{advance, Transition};
use storehub::session::FlowStep;

const JOBS: usize = 2_000;

/// Submits `JOBS` trivial jobs spread over `keys` lanes and waits for all of them.
async fn run_lanes(keys: usize) -> usize {
    let tracker = TaskTracker::new();
    let lanes: KeyedLanes<usize> = KeyedLanes::new(LaneLimits { workers: 8, pending: 512 }, tracker.clone());
    let cancel = CancellationToken::new();
    let done = Arc::new(AtomicUsize::new(0));

    for i in 0..JOBS {
        let done = done.clone();
        lanes
            .submit(
                i % keys,
                Box::pin(async move {
                    done.fetch_add(1, Ordering::Relaxed);
                }),
                &cancel,
            )
            .await;
    }
    tracker.close();
    tracker.wait().await;
    done.load(Ordering::Relaxed)
}

fn bench_lanes(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("keyed_lanes");
    group.throughput(Throughput::Elements(JOBS as u64));

    for keys in [1usize, 16, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(keys), &keys, |b, &keys| {
            b.to_async(&runtime).iter(|| run_lanes(keys));
        });
    }
    group.finish();
}

fn bench_flow_advance(c: &mut Criterion) {
    let step = FlowStep::ProductAwaitingPrice {
        store_id: 1,
        name: "Blue mug".to_string(),
        description: "Glazed stoneware".to_string(),
    };
    let event = InboundEvent::text(1, 1, "25,000");

    c.bench_function("flow_advance_price", |b| {
        b.iter(|| {
            let transition = advance(std::hint::black_box(&step), std::hint::black_box(&event));
            assert!(matches!(transition, Transition::Advance(_)));
        });
    });
}

criterion_group!(benches, bench_lanes, bench_flow_advance);
criterion_main!(benches);
