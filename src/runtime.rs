//! Feedback runtime implementation.
//!
//! The runtime combines a tokio async runtime, which runs loops and effects,
//! with a rayon thread pool for CPU-bound effects. Every managed thread can
//! reach the runtime through [`current_runtime`](crate::current_runtime).
//!
//! # Thread Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     FeedbackRuntime                         │
//! │  task_tracker: loops and effects spawned by the scheduler   │
//! │  compute_state: closures in flight on rayon                 │
//! └─────────────────────────────────────────────────────────────┘
//!          │ on_thread_start           │ start_handler
//!          ▼                           ▼
//! ┌─────────────────────┐     ┌─────────────────────┐
//! │   Tokio Workers     │     │   Rayon Workers     │
//! │  thread_local! {    │     │  thread_local! {    │
//! │    RUNTIME: slot    │     │    RUNTIME: slot    │
//! │  }                  │     │  }                  │
//! └─────────────────────┘     └─────────────────────┘
//! ```

use crate::bridge::ComputeTask;
use crate::config::FeedbackConfig;
use crate::context::{
    clear_current_runtime, restore_current_runtime, set_current_runtime, RuntimeSlot,
};
use crate::error::{FeedbackError, Result};
use crate::metrics::FeedbackMetrics;
use crate::scheduler::{Scheduled, Scheduler};

use futures::future::BoxFuture;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// State for tracking in-flight compute tasks.
///
/// Combines the task counter with a notification mechanism for efficient
/// shutdown waiting (avoids spin loops).
struct ComputeTaskState {
    /// Number of tasks currently executing on rayon
    count: AtomicUsize,
    /// Notified when count reaches 0
    notify: Notify,
}

impl ComputeTaskState {
    fn new() -> Self {
        Self {
            count: AtomicUsize::new(0),
            notify: Notify::new(),
        }
    }
}

/// Decrements the compute task counter on drop, including on panic.
struct ComputeTaskGuard {
    state: Arc<ComputeTaskState>,
}

impl ComputeTaskGuard {
    fn new(state: &Arc<ComputeTaskState>) -> Self {
        state.count.fetch_add(1, Ordering::Relaxed);
        Self {
            state: Arc::clone(state),
        }
    }
}

impl Drop for ComputeTaskGuard {
    fn drop(&mut self) {
        let prev = self.state.count.fetch_sub(1, Ordering::Release);
        if prev == 1 {
            self.state.notify.notify_waiters();
        }
    }
}

/// A runtime for feedback loops: tokio for loops and effects, rayon for
/// CPU-bound effects, and a task tracker for graceful shutdown.
///
/// Cloning is cheap; clones share the same threads.
///
/// # Examples
///
/// ```ignore
/// use feedback_rs::{FeedbackBuilder, System};
///
/// let runtime = FeedbackBuilder::new()
///     .prefix("myapp")
///     .tokio_threads(2)
///     .rayon_threads(6)
///     .build()?;
///
/// runtime.block_on(async {
///     let states = System::new(0, reduce)
///         .feedback(feedbacks())
///         .run(runtime.scheduler());
///     // consume states ...
/// });
///
/// runtime.block_until_idle();
/// ```
#[derive(Clone)]
pub struct FeedbackRuntime {
    inner: Arc<FeedbackRuntimeInner>,
}

/// Inner state shared with thread-locals.
pub(crate) struct FeedbackRuntimeInner {
    config: FeedbackConfig,
    tokio_runtime: tokio::runtime::Runtime,
    rayon_pool: rayon::ThreadPool,
    task_tracker: TaskTracker,
    compute_state: Arc<ComputeTaskState>,
    tokio_threads: usize,
    rayon_threads: usize,
    metrics: FeedbackMetrics,
    slot: RuntimeSlot,
}

impl FeedbackRuntime {
    /// Create a runtime from a configuration.
    ///
    /// This is typically called via `FeedbackBuilder::build()`.
    pub(crate) fn from_config(config: FeedbackConfig) -> Result<Self> {
        let available_cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let tokio_threads = config.effective_tokio_threads();
        let rayon_threads = config.effective_rayon_threads(available_cpus);
        if tokio_threads == 0 {
            return Err(FeedbackError::NoThreads("tokio"));
        }
        if rayon_threads == 0 {
            return Err(FeedbackError::NoThreads("rayon"));
        }

        info!(
            prefix = %config.prefix,
            tokio_threads,
            rayon_threads,
            available_cpus,
            "building feedback runtime"
        );

        let prefix: Arc<str> = config.prefix.as_str().into();
        // Threads start before the runtime exists; the slot is filled below.
        let slot: RuntimeSlot = Arc::new(OnceLock::new());

        let tokio_runtime = Self::build_tokio_runtime(&prefix, tokio_threads, slot.clone())?;
        let rayon_pool = Self::build_rayon_pool(&prefix, rayon_threads, slot.clone())?;

        let metrics = FeedbackMetrics::with_prefix(&config.metrics_prefix);
        if let Some(ref registry) = config.prometheus_registry {
            if let Err(e) = metrics.register(registry) {
                warn!(%e, "failed to register prometheus metrics");
            }
        }

        let inner = Arc::new(FeedbackRuntimeInner {
            config,
            tokio_runtime,
            rayon_pool,
            task_tracker: TaskTracker::new(),
            compute_state: Arc::new(ComputeTaskState::new()),
            tokio_threads,
            rayon_threads,
            metrics,
            slot: slot.clone(),
        });
        let _ = slot.set(Arc::downgrade(&inner));

        Ok(Self { inner })
    }

    pub(crate) fn from_inner(inner: Arc<FeedbackRuntimeInner>) -> Self {
        Self { inner }
    }

    fn build_tokio_runtime(
        prefix: &Arc<str>,
        num_threads: usize,
        slot: RuntimeSlot,
    ) -> Result<tokio::runtime::Runtime> {
        let thread_counter = Arc::new(AtomicUsize::new(0));
        let name_prefix = Arc::clone(prefix);
        let start_prefix = Arc::clone(prefix);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(num_threads)
            .thread_name_fn(move || {
                let id = thread_counter.fetch_add(1, Ordering::SeqCst);
                format!("{}-tokio-{:04}", name_prefix, id)
            })
            .on_thread_start(move || {
                debug!(%start_prefix, "tokio thread starting");
                set_current_runtime(slot.clone());
            })
            .on_thread_stop(|| {
                clear_current_runtime();
            })
            .enable_all()
            .build()?;

        Ok(runtime)
    }

    fn build_rayon_pool(
        prefix: &Arc<str>,
        num_threads: usize,
        slot: RuntimeSlot,
    ) -> Result<rayon::ThreadPool> {
        let name_prefix = Arc::clone(prefix);
        let start_prefix = Arc::clone(prefix);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(move |i| format!("{}-rayon-{:04}", name_prefix, i))
            .start_handler(move |thread_index| {
                debug!(thread_index, %start_prefix, "rayon thread starting");
                set_current_runtime(slot.clone());
            })
            .exit_handler(|_thread_index| {
                clear_current_runtime();
            })
            .build()?;

        Ok(pool)
    }

    /// Get the resolved configuration.
    pub fn config(&self) -> &FeedbackConfig {
        &self.inner.config
    }

    /// Get the tokio runtime handle.
    ///
    /// For tracked async tasks, prefer `spawn_async()`.
    pub fn tokio_handle(&self) -> &Handle {
        self.inner.tokio_runtime.handle()
    }

    /// Get the rayon thread pool.
    ///
    /// For tracked compute tasks, prefer `spawn_compute()`.
    pub fn rayon_pool(&self) -> &rayon::ThreadPool {
        &self.inner.rayon_pool
    }

    /// Get the task tracker for graceful shutdown.
    pub fn task_tracker(&self) -> &TaskTracker {
        &self.inner.task_tracker
    }

    /// Get the metrics shared by this runtime's loops and effects.
    ///
    /// If a Prometheus registry was provided via
    /// `FeedbackBuilder::prometheus_registry()`, the metrics are also
    /// registered for exposition.
    pub fn metrics(&self) -> &FeedbackMetrics {
        &self.inner.metrics
    }

    /// A scheduler that spawns tracked tasks on this runtime.
    pub fn scheduler(&self) -> RuntimeScheduler {
        RuntimeScheduler {
            handle: self.tokio_handle().clone(),
            tracker: self.inner.task_tracker.clone(),
        }
    }

    /// Block on a future using the tokio runtime.
    ///
    /// [`current_runtime`](crate::current_runtime) returns this runtime for the
    /// duration of the call.
    pub fn block_on<F: Future>(&self, f: F) -> F::Output {
        let previous = set_current_runtime(self.inner.slot.clone());
        let result = self.inner.tokio_runtime.block_on(f);
        restore_current_runtime(previous);
        result
    }

    /// Spawn a tracked async task on tokio.
    ///
    /// The task is tracked for graceful shutdown via `block_until_idle()`.
    #[inline]
    pub fn spawn_async<F>(&self, future: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let token = self.inner.task_tracker.token();
        self.inner.tokio_runtime.spawn(async move {
            let _guard = token;
            future.await
        })
    }

    /// Spawn CPU-bound work on rayon and await the result.
    ///
    /// The work is tracked for graceful shutdown via `block_until_idle()`.
    /// It runs to completion even if the returned future is dropped. A panic
    /// in `f` is resumed in the task awaiting the result.
    ///
    /// ```ignore
    /// runtime.block_on(async {
    ///     let result = runtime.spawn_compute(|| expensive_computation()).await;
    /// });
    /// ```
    pub fn spawn_compute<F, R>(&self, f: F) -> ComputeTask<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (task, completion) = ComputeTask::new();
        // Increment before spawning so shutdown never misses the task.
        let guard = ComputeTaskGuard::new(&self.inner.compute_state);
        self.inner.metrics.compute_tasks.inc();

        self.inner.rayon_pool.spawn(move || {
            // Decrement before completing so a woken waiter sees the count drop.
            let outcome = {
                let _guard = guard;
                panic::catch_unwind(AssertUnwindSafe(f))
            };
            match outcome {
                Ok(result) => completion.complete(result),
                Err(payload) => completion.complete_with_panic(payload),
            }
        });

        task
    }

    /// Execute work on rayon (sync, blocking). Not tracked.
    #[inline]
    pub fn install<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        self.inner.rayon_pool.install(f)
    }

    /// Stop accepting new tasks.
    ///
    /// Spawning still works afterwards, but the shutdown process has begun.
    /// Use `is_idle()` or `wait_for_shutdown()` to check/wait for completion.
    pub fn shutdown(&self) {
        self.inner.task_tracker.close();
    }

    /// Check if all tracked tasks have completed.
    ///
    /// Returns `true` if `shutdown()` has been called and all tracked async
    /// tasks and compute tasks have finished.
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.inner.task_tracker.is_closed()
            && self.inner.task_tracker.is_empty()
            && self.inner.compute_state.count.load(Ordering::Acquire) == 0
    }

    /// Get the number of compute tasks currently in flight.
    #[inline]
    pub fn compute_tasks_in_flight(&self) -> usize {
        self.inner.compute_state.count.load(Ordering::Relaxed)
    }

    /// Wait for all tracked tasks to complete (async).
    ///
    /// Requires `shutdown()` to be called first, otherwise this will wait
    /// forever. Loops that are still subscribed count as tracked tasks.
    pub async fn wait_for_shutdown(&self) {
        self.inner.task_tracker.wait().await;

        let mut logged = false;
        loop {
            let notified = self.inner.compute_state.notify.notified();
            let count = self.inner.compute_state.count.load(Ordering::Acquire);
            if count == 0 {
                break;
            }
            if !logged {
                debug!(count, "waiting for compute tasks to complete");
                logged = true;
            }
            notified.await;
        }
    }

    /// Block until all tracked tasks complete (from main thread).
    ///
    /// Calls `shutdown()`, then waits for every tracked async and compute
    /// task to finish.
    pub fn block_until_idle(&self) {
        self.shutdown();
        self.block_on(self.wait_for_shutdown());
    }

    /// Get the number of tokio worker threads.
    pub fn tokio_threads(&self) -> usize {
        self.inner.tokio_threads
    }

    /// Get the number of rayon threads.
    pub fn rayon_threads(&self) -> usize {
        self.inner.rayon_threads
    }
}

impl std::fmt::Debug for FeedbackRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedbackRuntime")
            .field("config", &self.inner.config)
            .field(
                "compute_tasks_in_flight",
                &self.inner.compute_state.count.load(Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

impl std::fmt::Display for FeedbackRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "FeedbackRuntime[{}]: tokio({}) rayon({})",
            self.inner.config.prefix, self.inner.tokio_threads, self.inner.rayon_threads,
        )
    }
}

/// Scheduler that spawns tracked tasks on a [`FeedbackRuntime`].
///
/// Tasks count towards `block_until_idle()` until they finish or their
/// [`Scheduled`] handle is dropped.
#[derive(Debug, Clone)]
pub struct RuntimeScheduler {
    handle: Handle,
    tracker: TaskTracker,
}

impl Scheduler for RuntimeScheduler {
    fn schedule(&self, task: BoxFuture<'static, ()>) -> Scheduled {
        let token = self.tracker.token();
        Scheduled::spawned(self.handle.spawn(async move {
            let _guard = token;
            task.await
        }))
    }

    fn name(&self) -> &str {
        "runtime"
    }
}
