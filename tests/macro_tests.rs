//! Integration tests for the #[feedback_rs::test] macro.

use feedback_rs::{effect, react, BoxError, System};
use futures::StreamExt;

fn counter() -> System<u32, u32> {
    System::new(0, |state: u32, delta: u32| state + delta).feedback(react(
        |state: &u32| (*state < 3).then_some(*state),
        |_| effect::once(1),
    ))
}

/// Test basic usage with defaults (1 tokio, 2 rayon)
#[feedback_rs::test]
async fn test_current_runtime_available() {
    let runtime = feedback_rs::current_runtime().expect("runtime should be available");
    assert_eq!(runtime.tokio_threads(), 1);
    assert_eq!(runtime.rayon_threads(), 2);
    assert!(runtime.config().prefix.starts_with("test-"));
}

/// Test custom tokio thread count
#[feedback_rs::test(tokio_thread_count = 2)]
async fn test_custom_tokio_threads() {
    let runtime = feedback_rs::current_runtime().expect("runtime should be available");
    assert_eq!(runtime.tokio_threads(), 2);
    assert_eq!(runtime.rayon_threads(), 2); // Default
}

/// Test both custom thread counts
#[feedback_rs::test(tokio_thread_count = 2, rayon_thread_count = 4)]
async fn test_custom_both_thread_counts() {
    let runtime = feedback_rs::current_runtime().expect("runtime should be available");
    assert_eq!(runtime.tokio_threads(), 2);
    assert_eq!(runtime.rayon_threads(), 4);
}

/// Thread names follow an explicit prefix.
#[feedback_rs::test(prefix = "custom-loops")]
async fn test_custom_prefix() {
    let runtime = feedback_rs::current_runtime().unwrap();
    assert_eq!(runtime.config().prefix, "custom-loops");
    let name = runtime
        .spawn_compute(|| std::thread::current().name().map(str::to_owned))
        .await;
    assert!(name.unwrap().starts_with("custom-loops-rayon-"));
}

/// The counter loop runs on the runtime's scheduler.
#[feedback_rs::test]
async fn test_counter_on_runtime_scheduler() {
    let runtime = feedback_rs::current_runtime().unwrap();
    let states: Vec<u32> = counter()
        .run(runtime.scheduler())
        .take(4)
        .map(|state| state.unwrap())
        .collect()
        .await;
    assert_eq!(states, vec![0, 1, 2, 3]);
    // The loop was dropped by `take`; block_until_idle waits for its teardown.
}

/// Effects can offload work to the rayon pool.
#[feedback_rs::test(tokio_thread_count = 2)]
async fn test_compute_effect_in_loop() {
    let runtime = feedback_rs::current_runtime().unwrap();
    let system = System::new(0u64, |_, next: u64| next).feedback(react(
        |state: &u64| (*state < 10).then_some(*state),
        |n: u64| {
            effect::compute(move || {
                let on_rayon = std::thread::current()
                    .name()
                    .is_some_and(|name| name.contains("-rayon-"));
                if on_rayon {
                    Ok(n + 1)
                } else {
                    Err(BoxError::from("compute ran off the rayon pool"))
                }
            })
        },
    ));

    let last = system
        .run(runtime.scheduler())
        .take(11)
        .map(|state| state.unwrap())
        .collect::<Vec<_>>()
        .await;
    assert_eq!(last, (0..=10).collect::<Vec<_>>());
}

/// A panicking compute effect fails alone; the loop and other feedbacks go on.
#[feedback_rs::test(tokio_thread_count = 2)]
async fn test_panicking_compute_effect_is_contained() {
    let runtime = feedback_rs::current_runtime().unwrap();
    let metrics = feedback_rs::FeedbackMetrics::new();
    let system = System::new(0u32, |state: u32, delta: u32| state + delta)
        .metrics(metrics.clone())
        .feedback(react(
            |_: &u32| Some(()),
            |_| effect::compute(|| -> Result<u32, BoxError> { panic!("bad effect") }),
        ))
        .feedback(react(
            |state: &u32| (*state < 3).then_some(*state),
            |_| effect::once(1),
        ));

    let mut states = system.run(runtime.scheduler());
    for expected in 0..=3 {
        assert_eq!(states.next().await.unwrap().unwrap(), expected);
    }

    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while metrics.effect_failures.get() == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("the panicking effect should be counted as failed");
    assert_eq!(metrics.effect_failures.get(), 1);
    assert_eq!(metrics.reduce_failures.get(), 0);
}

/// Loops started on the runtime record into the runtime's metrics.
#[feedback_rs::test]
async fn test_loop_metrics_shared_with_runtime() {
    let runtime = feedback_rs::current_runtime().unwrap();
    let metrics = runtime.metrics().clone();

    let states = counter()
        .metrics(metrics.clone())
        .run(runtime.scheduler())
        .take(4)
        .count()
        .await;
    assert_eq!(states, 4);
    assert_eq!(metrics.loops_started.get(), 1);
    assert_eq!(metrics.events_folded.get(), 3);
    assert!(metrics.effects_started.get() >= 3);
}

/// Test that spawn_async works
#[feedback_rs::test]
async fn test_spawn_async() {
    let runtime = feedback_rs::current_runtime().unwrap();
    let handle = runtime.spawn_async(async { 100 });
    assert_eq!(handle.await.unwrap(), 100);
}

/// Test using the free function try_spawn_compute.
#[feedback_rs::test]
async fn test_free_function_spawn_compute() {
    let task = feedback_rs::try_spawn_compute(|| (0..1000).map(|x| x * x).sum::<i64>())
        .expect("inside a runtime");
    assert_eq!(task.await, 332833500); // sum of squares 0..1000
}

/// Test that compute tasks spawned without await still complete.
#[feedback_rs::test]
async fn test_compute_task_tracking() {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    let completed = Arc::new(AtomicBool::new(false));
    let completed_clone = completed.clone();
    let runtime = feedback_rs::current_runtime().unwrap();

    // Not awaited; block_until_idle still waits for it.
    let _task = runtime.spawn_compute(move || {
        completed_clone.store(true, Ordering::Release);
    });
}

/// Test that the macro supports Result<()> return type.
#[feedback_rs::test]
async fn test_result_with_question_mark() -> Result<(), Box<dyn std::error::Error>> {
    let value: u32 = "2".parse()?;
    let runtime = feedback_rs::current_runtime().ok_or("no runtime")?;
    let mut states = counter().run(runtime.scheduler());
    for expected in 0..=value {
        assert_eq!(states.next().await.ok_or("ended")??, expected);
    }
    Ok(())
}

#[test]
fn test_try_spawn_compute_outside_runtime() {
    assert!(feedback_rs::try_spawn_compute(|| 1).is_none());
}
