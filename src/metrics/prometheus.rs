//! Prometheus metrics for feedback loops.
//!
//! Counters work standalone without a Registry - registration is only needed
//! for exposition (scraping). Metric names use a configurable `{prefix}_`
//! prefix (default: "feedback").

use prometheus::{IntCounter, IntGauge, Opts, Registry};

/// Prometheus metrics for feedback loops and their effects.
///
/// Clones share the same underlying counters.
#[derive(Clone)]
pub struct FeedbackMetrics {
    // === Gauges (current values) ===
    /// Loop runs currently subscribed
    pub active_loops: IntGauge,

    /// Enqueued effects currently subscribed
    pub active_effects: IntGauge,

    // === Counters (cumulative) ===
    /// Loop runs started
    pub loops_started: IntCounter,

    /// Events passed to an accumulator
    pub events_folded: IntCounter,

    /// States published by loops, including initial states
    pub states_emitted: IntCounter,

    /// Accumulator failures
    pub reduce_failures: IntCounter,

    /// Effects enqueued
    pub effects_started: IntCounter,

    /// Effects dropped before they completed
    pub effects_cancelled: IntCounter,

    /// Effects that ended with an error
    pub effect_failures: IntCounter,

    /// Closures offloaded to the rayon pool
    pub compute_tasks: IntCounter,
}

impl Default for FeedbackMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn sanitize_prefix(prefix: &str) -> String {
    // Valid chars: [a-zA-Z_:] for first char, [a-zA-Z0-9_:] for rest
    prefix
        .chars()
        .enumerate()
        .map(|(i, c)| {
            let valid = if i == 0 {
                c.is_ascii_alphabetic() || c == '_' || c == ':'
            } else {
                c.is_ascii_alphanumeric() || c == '_' || c == ':'
            };
            if valid {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn gauge(prefix: &str, name: &str, help: &str) -> IntGauge {
    IntGauge::with_opts(Opts::new(format!("{}_{}", prefix, name), help))
        .expect("metric creation should not fail")
}

fn counter(prefix: &str, name: &str, help: &str) -> IntCounter {
    IntCounter::with_opts(Opts::new(format!("{}_{}", prefix, name), help))
        .expect("metric creation should not fail")
}

impl FeedbackMetrics {
    /// Create metrics with default prefix "feedback".
    pub fn new() -> Self {
        Self::with_prefix("feedback")
    }

    /// Create metrics with a custom prefix.
    ///
    /// Invalid characters in the prefix (e.g. hyphens) are replaced with
    /// underscores, so `"my-app"` yields `my_app_events_folded`.
    pub fn with_prefix(prefix: &str) -> Self {
        let prefix = sanitize_prefix(prefix);
        Self {
            active_loops: gauge(&prefix, "active_loops", "Loop runs currently subscribed"),
            active_effects: gauge(
                &prefix,
                "active_effects",
                "Enqueued effects currently subscribed",
            ),
            loops_started: counter(&prefix, "loops_started", "Loop runs started"),
            events_folded: counter(
                &prefix,
                "events_folded",
                "Events passed to an accumulator",
            ),
            states_emitted: counter(&prefix, "states_emitted", "States published by loops"),
            reduce_failures: counter(&prefix, "reduce_failures", "Accumulator failures"),
            effects_started: counter(&prefix, "effects_started", "Effects enqueued"),
            effects_cancelled: counter(
                &prefix,
                "effects_cancelled",
                "Effects dropped before they completed",
            ),
            effect_failures: counter(
                &prefix,
                "effect_failures",
                "Effects that ended with an error",
            ),
            compute_tasks: counter(
                &prefix,
                "compute_tasks",
                "Closures offloaded to the rayon pool",
            ),
        }
    }

    /// Register all metrics with a Registry for exposition.
    ///
    /// # Errors
    ///
    /// Returns an error if any metric fails to register (e.g., duplicate names).
    pub fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.active_loops.clone()))?;
        registry.register(Box::new(self.active_effects.clone()))?;
        registry.register(Box::new(self.loops_started.clone()))?;
        registry.register(Box::new(self.events_folded.clone()))?;
        registry.register(Box::new(self.states_emitted.clone()))?;
        registry.register(Box::new(self.reduce_failures.clone()))?;
        registry.register(Box::new(self.effects_started.clone()))?;
        registry.register(Box::new(self.effects_cancelled.clone()))?;
        registry.register(Box::new(self.effect_failures.clone()))?;
        registry.register(Box::new(self.compute_tasks.clone()))?;
        Ok(())
    }

    /// Record an effect subscription.
    #[inline]
    pub fn effect_started(&self) {
        self.effects_started.inc();
        self.active_effects.inc();
    }

    /// Record the end of an effect subscription.
    #[inline]
    pub fn effect_stopped(&self, cancelled: bool) {
        if cancelled {
            self.effects_cancelled.inc();
        }
        self.active_effects.dec();
    }
}

impl std::fmt::Debug for FeedbackMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedbackMetrics")
            .field("active_loops", &self.active_loops.get())
            .field("active_effects", &self.active_effects.get())
            .field("events_folded", &self.events_folded.get())
            .field("effects_cancelled", &self.effects_cancelled.get())
            .finish()
    }
}

/// Keeps `active_loops` accurate for one loop run.
///
/// Decrements on drop, which covers completion, failure and cancellation alike.
pub(crate) struct LoopGuard {
    metrics: FeedbackMetrics,
}

impl LoopGuard {
    pub(crate) fn new(metrics: &FeedbackMetrics) -> Self {
        metrics.loops_started.inc();
        metrics.active_loops.inc();
        Self {
            metrics: metrics.clone(),
        }
    }
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        self.metrics.active_loops.dec();
    }
}
