//! Benchmarks for feedback loop throughput.
//!
//! Run with: cargo bench
//!
//! Each iteration runs a counter loop from zero to the target, one effect per
//! fold, and measures the cost per fold for each scheduler.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use feedback_rs::{
    effect, react, react_set, FeedbackBuilder, FeedbackRuntime, ImmediateScheduler, Scheduler,
    System, TokioScheduler,
};
use futures::StreamExt;
use std::collections::HashSet;

fn create_runtime() -> FeedbackRuntime {
    FeedbackBuilder::new()
        .prefix("bench")
        .tokio_threads(2)
        .rayon_threads(4)
        .build()
        .expect("failed to create runtime")
}

fn counter(target: u64) -> System<u64, u64> {
    System::new(0u64, |state: u64, delta: u64| state + delta).feedback(react(
        move |state: &u64| (*state < target).then_some(*state),
        |_| effect::once(1),
    ))
}

async fn count_to<Sch: Scheduler>(system: &System<u64, u64>, scheduler: Sch, target: u64) -> u64 {
    let mut states = system.run(scheduler);
    while let Some(state) = states.next().await {
        let state = state.expect("counter never fails");
        if state == target {
            return state;
        }
    }
    unreachable!("state stream ended before reaching the target")
}

/// Folds per second through `react` on each scheduler.
fn bench_react_counter(c: &mut Criterion) {
    let runtime = create_runtime();
    let mut group = c.benchmark_group("react_counter");

    for target in [10u64, 100, 1000] {
        let system = counter(target);
        group.throughput(Throughput::Elements(target));

        group.bench_with_input(BenchmarkId::new("immediate", target), &target, |b, &target| {
            b.iter(|| runtime.block_on(count_to(&system, ImmediateScheduler, black_box(target))));
        });

        group.bench_with_input(BenchmarkId::new("tokio", target), &target, |b, &target| {
            let scheduler = TokioScheduler::new(runtime.tokio_handle().clone());
            b.iter(|| runtime.block_on(count_to(&system, scheduler.clone(), black_box(target))));
        });

        group.bench_with_input(BenchmarkId::new("runtime", target), &target, |b, &target| {
            b.iter(|| runtime.block_on(count_to(&system, runtime.scheduler(), black_box(target))));
        });
    }

    group.finish();
}

/// Draining a set of independent effects through `react_set`.
fn bench_react_set_drain(c: &mut Criterion) {
    let runtime = create_runtime();
    let mut group = c.benchmark_group("react_set_drain");

    for width in [8u32, 64, 256] {
        let system = System::new(
            (0..width).collect::<HashSet<u32>>(),
            |mut pending: HashSet<u32>, done: u32| {
                pending.remove(&done);
                pending
            },
        )
        .feedback(react_set(
            |pending: &HashSet<u32>| pending.clone(),
            |id: u32| effect::once(id),
        ));
        group.throughput(Throughput::Elements(u64::from(width)));

        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            b.iter(|| {
                runtime.block_on(async {
                    let mut states = system.run(ImmediateScheduler);
                    while let Some(state) = states.next().await {
                        if state.expect("drain never fails").is_empty() {
                            break;
                        }
                    }
                })
            });
        });
    }

    group.finish();
}

/// Compute effects offloaded to the rayon pool.
fn bench_compute_effects(c: &mut Criterion) {
    let runtime = create_runtime();
    let mut group = c.benchmark_group("compute_effects");
    let target = 100u64;

    let system = System::new(0u64, |_, next: u64| next).feedback(react(
        move |state: &u64| (*state < target).then_some(*state),
        |n: u64| effect::compute(move || Ok::<_, feedback_rs::BoxError>(black_box(n) + 1)),
    ));
    group.throughput(Throughput::Elements(target));

    group.bench_function("runtime", |b| {
        b.iter(|| runtime.block_on(count_to(&system, runtime.scheduler(), target)));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_react_counter,
    bench_react_set_drain,
    bench_compute_effects,
);
criterion_main!(benches);
