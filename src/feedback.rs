//! Feedback functions and the context they are subscribed with.
//!
//! A feedback function turns the loop's state stream into an event stream. It
//! is invoked once per loop run with a [`SchedulerContext`], which carries:
//!
//! - `source`: the states published by the loop, in order
//! - `scheduler`: where state-dependent work (effects) should run
//! - `metrics`: the loop's metrics handle
//!
//! ```ignore
//! use feedback_rs::{Feedback, SchedulerContext};
//! use futures::StreamExt;
//!
//! // Emit a `Tick` event for every state that asks for one.
//! let ticks = Feedback::new(|context: SchedulerContext<State>| {
//!     context
//!         .source
//!         .filter_map(|state| async move { state.wants_tick.then_some(Event::Tick) })
//!         .boxed()
//! });
//! ```

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::BoxStream;
use futures_core::Stream;
use tokio::sync::mpsc;

use crate::enqueue::Enqueued;
use crate::error::BoxError;
use crate::metrics::FeedbackMetrics;
use crate::scheduler::SharedScheduler;

/// Stream of events produced by a feedback function.
pub type EventStream<E> = BoxStream<'static, E>;

/// Stream of results produced by an effect. The first error ends the effect.
pub type EffectStream<E> = BoxStream<'static, std::result::Result<E, BoxError>>;

/// States published by a loop run to one feedback function.
///
/// The stream ends when the loop run is torn down.
#[must_use = "streams do nothing unless polled"]
pub struct StateSource<S> {
    states: mpsc::UnboundedReceiver<S>,
}

impl<S> Unpin for StateSource<S> {}

impl<S> Stream for StateSource<S> {
    type Item = S;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<S>> {
        self.states.poll_recv(cx)
    }
}

impl<S> fmt::Debug for StateSource<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateSource").finish_non_exhaustive()
    }
}

/// Loop-side half of a [`StateSource`].
pub(crate) struct StateSink<S> {
    states: mpsc::UnboundedSender<S>,
}

impl<S> StateSink<S> {
    /// Publish a state. Returns `false` once the feedback dropped its source.
    pub(crate) fn send(&self, state: S) -> bool {
        self.states.send(state).is_ok()
    }
}

pub(crate) fn state_channel<S>() -> (StateSink<S>, StateSource<S>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (StateSink { states: tx }, StateSource { states: rx })
}

/// Everything a feedback function receives when a loop run subscribes to it.
pub struct SchedulerContext<S> {
    /// States published by the loop run.
    pub source: StateSource<S>,
    /// Scheduler for state-dependent work.
    pub scheduler: SharedScheduler,
    /// Metrics of the loop run.
    pub metrics: FeedbackMetrics,
}

impl<S> SchedulerContext<S> {
    pub(crate) fn new(
        source: StateSource<S>,
        scheduler: SharedScheduler,
        metrics: FeedbackMetrics,
    ) -> Self {
        Self {
            source,
            scheduler,
            metrics,
        }
    }

    /// Enqueue an effect on this context's scheduler.
    ///
    /// See [`enqueue`](crate::enqueue::enqueue).
    pub fn enqueue<E: Send + 'static>(&self, effect: EffectStream<E>) -> Enqueued<E> {
        Enqueued::with_metrics(effect, self.scheduler.clone(), self.metrics.clone())
    }
}

impl<S> fmt::Debug for SchedulerContext<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerContext")
            .field("source", &self.source)
            .field("scheduler", &self.scheduler.name())
            .finish_non_exhaustive()
    }
}

type FeedbackFn<S, E> = dyn Fn(SchedulerContext<S>) -> EventStream<E> + Send + Sync;

/// One independent source of events for a loop.
///
/// Cheap to clone; a [`System`](crate::System) invokes each feedback once per run.
pub struct Feedback<S, E> {
    subscribe: Arc<FeedbackFn<S, E>>,
}

impl<S, E> Clone for Feedback<S, E> {
    fn clone(&self) -> Self {
        Self {
            subscribe: Arc::clone(&self.subscribe),
        }
    }
}

impl<S: Send + 'static, E: Send + 'static> Feedback<S, E> {
    /// Create a feedback from a function of the scheduler context.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(SchedulerContext<S>) -> EventStream<E> + Send + Sync + 'static,
    {
        Self {
            subscribe: Arc::new(f),
        }
    }

    /// Create a feedback from a function of the bare state stream.
    ///
    /// The scheduler is ignored; effects started by `f` run wherever `f` puts them.
    pub fn from_source<F>(f: F) -> Self
    where
        F: Fn(StateSource<S>) -> EventStream<E> + Send + Sync + 'static,
    {
        Self::new(move |context| f(context.source))
    }

    /// Subscribe the feedback with `context`.
    pub fn subscribe(&self, context: SchedulerContext<S>) -> EventStream<E> {
        (self.subscribe)(context)
    }
}

impl<S, E> fmt::Debug for Feedback<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Feedback").finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::scheduler::ImmediateScheduler;

    /// A context fed by the returned sink, running effects inline.
    pub(crate) fn immediate_context<S>() -> (StateSink<S>, SchedulerContext<S>) {
        let (sink, source) = state_channel();
        let context = SchedulerContext::new(
            source,
            Arc::new(ImmediateScheduler),
            FeedbackMetrics::new(),
        );
        (sink, context)
    }
}
