//! # feedback-rs
//!
//! **State machines closed by feedback**
//!
//! A feedback loop holds one piece of state. Feedback functions observe every
//! state the loop publishes and answer with events; an accumulator folds each
//! event into the next state, which is published again. The loop runs until
//! its consumer drops it or the accumulator fails.
//!
//! ## Features
//!
//! - **Serialized folds**: one task owns the state, events are folded one at a time
//! - **Query/effect adapters**: [`react`] (latest control wins) and [`react_set`]
//!   (one effect per control in a set), with cancellation on control change
//! - **Pluggable schedulers**: inline, any tokio runtime, or a [`FeedbackRuntime`]
//! - **CPU-bound effects**: [`effect::compute`] offloads closures to rayon
//! - **Teardown by ownership**: dropping the state stream cancels every feedback and effect
//! - **Flexible configuration**: files (TOML/YAML/JSON), environment variables, code, or CLI
//!
//! ## Quick Start
//!
//! ```ignore
//! use feedback_rs::{effect, react, StateStream, System, TokioScheduler};
//! use futures::StreamExt;
//!
//! #[derive(Clone, Debug)]
//! struct Counter {
//!     value: u32,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut states = System::new(Counter { value: 0 }, |state, delta: u32| Counter {
//!         value: state.value + delta,
//!     })
//!     .feedback(react(
//!         |state: &Counter| (state.value < 3).then_some(state.value),
//!         |_| effect::once(1),
//!     ))
//!     .run(TokioScheduler::current()?);
//!
//!     while let Some(state) = states.next().await {
//!         println!("{:?}", state?);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Runtime
//!
//! A [`FeedbackRuntime`] owns a tokio runtime for loops and effects and a
//! rayon pool for CPU-bound effects. Its [`scheduler`](FeedbackRuntime::scheduler)
//! tracks every loop and effect for graceful shutdown:
//!
//! ```ignore
//! use feedback_rs::FeedbackBuilder;
//!
//! let runtime = FeedbackBuilder::new()
//!     .prefix("myapp")
//!     .tokio_threads(2)
//!     .rayon_threads(6)
//!     .build()?;
//!
//! runtime.block_on(async {
//!     let states = system.run(runtime.scheduler());
//!     // ...
//! });
//!
//! runtime.block_until_idle();
//! ```
//!
//! ## Configuration
//!
//! Configuration sources are merged in the order the builder methods are called,
//! on top of the defaults:
//!
//! 1. Config files (via `.file()`)
//! 2. Environment variables (via `.env_prefix()`)
//! 3. Programmatic overrides
//! 4. CLI arguments (via `.with_cli_args()`)
//!
//! ### Config File Example (TOML)
//!
//! ```toml
//! prefix = "myapp"
//! tokio_threads = 2
//! rayon_threads = 6
//! metrics_prefix = "myapp"
//! ```
//!
//! ### Environment Variables
//!
//! With `.env_prefix("FEEDBACK")`:
//! - `FEEDBACK_PREFIX=myapp`
//! - `FEEDBACK_TOKIO_THREADS=2`
//! - `FEEDBACK_RAYON_THREADS=6`
//!
//! ## Thread Naming
//!
//! Threads are named with the configured prefix:
//! - Tokio threads: `{prefix}-tokio-0000`, `{prefix}-tokio-0001`, ...
//! - Rayon threads: `{prefix}-rayon-0000`, `{prefix}-rayon-0001`, ...

pub mod bind;
pub(crate) mod bridge;
pub mod builder;
pub mod config;
pub(crate) mod context;
pub mod effect;
pub mod enqueue;
pub mod error;
pub mod feedback;
pub mod metrics;
pub mod react;
pub mod runtime;
pub mod scheduler;
pub mod system;

pub use bind::{bind, bind_weak, Bindings};
pub use bridge::ComputeTask;
pub use builder::{FeedbackArgs, FeedbackBuilder};
pub use config::FeedbackConfig;
pub use context::current_runtime;
pub use enqueue::{enqueue, Enqueued};
pub use error::{BoxError, FeedbackError, Result};
pub use feedback::{EffectStream, EventStream, Feedback, SchedulerContext, StateSource};
pub use metrics::FeedbackMetrics;
pub use react::{react, react_set};
pub use runtime::{FeedbackRuntime, RuntimeScheduler};
pub use scheduler::{ImmediateScheduler, Scheduled, Scheduler, SharedScheduler, TokioScheduler};
pub use system::{system, StateStream, System};

/// Attribute for tests that run inside a [`FeedbackRuntime`].
pub use feedback_macros::test;

/// Spawn compute work using the current runtime.
///
/// Returns `None` outside a feedback runtime context (i.e., not within
/// `block_on`, a tokio worker thread, or a rayon worker thread managed by the
/// runtime).
///
/// ```ignore
/// if let Some(task) = feedback_rs::try_spawn_compute(|| work()) {
///     let result = task.await;
/// }
/// ```
pub fn try_spawn_compute<F, R>(f: F) -> Option<ComputeTask<R>>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    current_runtime().map(|rt| rt.spawn_compute(f))
}
