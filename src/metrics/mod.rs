//! Metrics collection for feedback loop observability.
//!
//! Prometheus-compatible counters and gauges for loop and effect lifecycles.
//! Metrics are always collected (atomic operations) and can optionally be
//! exposed via a Prometheus registry for scraping.
//!
//! # Available Metrics
//!
//! ## Gauges (current values)
//!
//! - `feedback_active_loops` - Loop runs currently subscribed
//! - `feedback_active_effects` - Enqueued effects currently subscribed
//!
//! ## Counters (cumulative)
//!
//! - `feedback_loops_started` - Loop runs started
//! - `feedback_events_folded` - Events passed to an accumulator
//! - `feedback_states_emitted` - States published by loops
//! - `feedback_reduce_failures` - Accumulator failures (each ends a loop)
//! - `feedback_effects_started` - Effects enqueued
//! - `feedback_effects_cancelled` - Effects dropped before they completed
//! - `feedback_effect_failures` - Effects that ended with an error
//! - `feedback_compute_tasks` - Closures offloaded to the rayon pool
//!
//! # Example
//!
//! ```ignore
//! use prometheus::Registry;
//! use feedback_rs::FeedbackBuilder;
//!
//! let registry = Registry::new();
//! let runtime = FeedbackBuilder::new()
//!     .prometheus_registry(registry.clone())
//!     .build()?;
//!
//! let states = System::new(0, reduce)
//!     .metrics(runtime.metrics().clone())
//!     .feedback(feedback)
//!     .run(runtime.scheduler());
//! ```

mod prometheus;

pub use self::prometheus::FeedbackMetrics;
pub(crate) use self::prometheus::LoopGuard;
