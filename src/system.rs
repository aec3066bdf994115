//! The feedback loop.
//!
//! A [`System`] describes a loop: an initial state, an accumulator that folds
//! an event into the state, and the feedback functions that observe the state
//! and produce events. [`System::run`] turns it into a lazy [`StateStream`].
//!
//! When the stream is first polled, one loop task is scheduled. The task:
//!
//! 1. subscribes every feedback function once, each with its own state source
//! 2. publishes the initial state to the feedbacks and to the consumer
//! 3. takes events from the merged feedback streams one at a time, folds each
//!    into the state and publishes the result before taking the next event
//!
//! The task is the only owner of the state, so folds never overlap. Dropping
//! the stream drops the task and with it every feedback and effect.
//!
//! # Example
//!
//! ```ignore
//! use feedback_rs::{effect, react, ImmediateScheduler, System};
//!
//! let states = System::new(0u32, |state, delta: u32| state + delta)
//!     .feedback(react(
//!         |state: &u32| (*state < 3).then_some(*state),
//!         |_| effect::once(1),
//!     ))
//!     .run(ImmediateScheduler);
//! ```

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::stream::select_all;
use futures::{FutureExt, StreamExt};
use futures_core::{FusedStream, Stream};
use tokio::sync::mpsc;
use tracing::{debug, debug_span, error, trace, Instrument};

use crate::error::{BoxError, FeedbackError};
use crate::feedback::{state_channel, EventStream, Feedback, SchedulerContext, StateSink};
use crate::metrics::{FeedbackMetrics, LoopGuard};
use crate::scheduler::{Scheduled, Scheduler, SharedScheduler};

type Reducer<S, E> = dyn Fn(S, E) -> std::result::Result<S, BoxError> + Send + Sync;

static NEXT_RUN: AtomicU64 = AtomicU64::new(0);

/// A feedback loop description. Cheap to clone and reusable.
pub struct System<S, E> {
    initial: S,
    reduce: Arc<Reducer<S, E>>,
    feedbacks: Vec<Feedback<S, E>>,
    metrics: FeedbackMetrics,
}

impl<S: Clone, E> Clone for System<S, E> {
    fn clone(&self) -> Self {
        Self {
            initial: self.initial.clone(),
            reduce: Arc::clone(&self.reduce),
            feedbacks: self.feedbacks.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<S, E> System<S, E>
where
    S: Clone + Send + 'static,
    E: Send + 'static,
{
    /// A loop with an infallible accumulator.
    pub fn new<R>(initial: S, reduce: R) -> Self
    where
        R: Fn(S, E) -> S + Send + Sync + 'static,
    {
        Self::try_new(initial, move |state, event| {
            Ok::<_, Infallible>(reduce(state, event))
        })
    }

    /// A loop whose accumulator may fail.
    ///
    /// A failure ends the run: the state stream yields
    /// [`FeedbackError::Reduce`] once and then ends.
    pub fn try_new<R, Err>(initial: S, reduce: R) -> Self
    where
        R: Fn(S, E) -> std::result::Result<S, Err> + Send + Sync + 'static,
        Err: Into<BoxError>,
    {
        Self {
            initial,
            reduce: Arc::new(move |state: S, event: E| -> std::result::Result<S, BoxError> {
                reduce(state, event).map_err(Into::into)
            }),
            feedbacks: Vec::new(),
            metrics: FeedbackMetrics::new(),
        }
    }

    /// Add a feedback function.
    pub fn feedback(mut self, feedback: Feedback<S, E>) -> Self {
        self.feedbacks.push(feedback);
        self
    }

    /// Add several feedback functions.
    pub fn feedbacks(mut self, feedbacks: impl IntoIterator<Item = Feedback<S, E>>) -> Self {
        self.feedbacks.extend(feedbacks);
        self
    }

    /// Record runs of this loop in `metrics` instead of a private set.
    pub fn metrics(mut self, metrics: FeedbackMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// The metrics runs of this loop record into.
    pub fn loop_metrics(&self) -> &FeedbackMetrics {
        &self.metrics
    }

    /// Create a run of the loop on `scheduler`.
    ///
    /// Nothing happens until the returned stream is polled. Every call creates
    /// an independent run with its own state.
    pub fn run<Sch: Scheduler>(&self, scheduler: Sch) -> StateStream<S> {
        let scheduler: SharedScheduler = Arc::new(scheduler);
        let (tx, rx) = mpsc::unbounded_channel();
        let run = NEXT_RUN.fetch_add(1, Ordering::Relaxed);
        let span = debug_span!("feedback_loop", run, scheduler = scheduler.name());

        let driver = drive(
            self.initial.clone(),
            Arc::clone(&self.reduce),
            self.feedbacks.clone(),
            Arc::clone(&scheduler),
            self.metrics.clone(),
            tx,
        )
        .instrument(span)
        .boxed();

        StateStream {
            pending: Some((driver, scheduler)),
            task: None,
            states: rx,
            terminated: false,
        }
    }
}

impl<S, E> fmt::Debug for System<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("System")
            .field("feedbacks", &self.feedbacks.len())
            .finish_non_exhaustive()
    }
}

/// Run a loop with an infallible accumulator.
///
/// Shorthand for `System::new(initial, reduce).feedbacks(feedbacks).run(scheduler)`.
pub fn system<S, E, R, Sch>(
    initial: S,
    reduce: R,
    scheduler: Sch,
    feedbacks: impl IntoIterator<Item = Feedback<S, E>>,
) -> StateStream<S>
where
    S: Clone + Send + 'static,
    E: Send + 'static,
    R: Fn(S, E) -> S + Send + Sync + 'static,
    Sch: Scheduler,
{
    System::new(initial, reduce)
        .feedbacks(feedbacks)
        .run(scheduler)
}

async fn drive<S, E>(
    initial: S,
    reduce: Arc<Reducer<S, E>>,
    feedbacks: Vec<Feedback<S, E>>,
    scheduler: SharedScheduler,
    metrics: FeedbackMetrics,
    output: mpsc::UnboundedSender<Result<S, FeedbackError>>,
) where
    S: Clone + Send + 'static,
    E: Send + 'static,
{
    let _guard = LoopGuard::new(&metrics);
    debug!(feedbacks = feedbacks.len(), "subscribing feedbacks");

    let mut sinks: Vec<StateSink<S>> = Vec::with_capacity(feedbacks.len());
    let mut streams: Vec<EventStream<E>> = Vec::with_capacity(feedbacks.len());
    for feedback in &feedbacks {
        let (sink, source) = state_channel();
        let context = SchedulerContext::new(source, Arc::clone(&scheduler), metrics.clone());
        streams.push(feedback.subscribe(context));
        sinks.push(sink);
    }
    drop(feedbacks);
    let mut events = select_all(streams);

    let mut state = initial;
    if !publish(&state, &sinks, &output, &metrics) {
        return;
    }

    while let Some(event) = events.next().await {
        metrics.events_folded.inc();
        match reduce(state, event) {
            Ok(next) => state = next,
            Err(error) => {
                error!(%error, "accumulator failed, ending loop");
                metrics.reduce_failures.inc();
                // Tear down every feedback before the failure is observable.
                drop(events);
                drop(sinks);
                let _ = output.send(Err(FeedbackError::Reduce(error)));
                return;
            }
        }
        if !publish(&state, &sinks, &output, &metrics) {
            return;
        }
    }

    debug!("every feedback ended, idling");
    drop(sinks);
    // The run only ends through teardown or an accumulator failure.
    std::future::pending::<()>().await;
}

/// Publish `state` to every feedback and to the consumer.
///
/// Returns `false` once the consumer is gone.
fn publish<S: Clone>(
    state: &S,
    sinks: &[StateSink<S>],
    output: &mpsc::UnboundedSender<Result<S, FeedbackError>>,
    metrics: &FeedbackMetrics,
) -> bool {
    for sink in sinks {
        // A feedback that dropped its source no longer observes states.
        sink.send(state.clone());
    }
    metrics.states_emitted.inc();
    if output.send(Ok(state.clone())).is_err() {
        trace!("consumer gone, stopping loop");
        return false;
    }
    true
}

/// States of one loop run.
///
/// Yields `Ok(state)` for the initial state and for every state after a fold.
/// Never ends on its own unless the accumulator fails, in which case it yields
/// one `Err` and ends. Dropping the stream tears the run down.
#[must_use = "streams do nothing unless polled"]
pub struct StateStream<S> {
    pending: Option<(BoxFuture<'static, ()>, SharedScheduler)>,
    task: Option<Scheduled>,
    states: mpsc::UnboundedReceiver<Result<S, FeedbackError>>,
    terminated: bool,
}

impl<S> Unpin for StateStream<S> {}

impl<S> Stream for StateStream<S> {
    type Item = Result<S, FeedbackError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.terminated {
            return Poll::Ready(None);
        }

        if let Some((driver, scheduler)) = this.pending.take() {
            this.task = Some(scheduler.schedule(driver));
        }
        if let Some(task) = this.task.as_mut() {
            // Drives inline runs; spawned runs only register interest here.
            let _ = Pin::new(task).poll(cx);
        }

        match this.states.poll_recv(cx) {
            Poll::Ready(Some(Ok(state))) => Poll::Ready(Some(Ok(state))),
            Poll::Ready(Some(Err(error))) => {
                this.task = None;
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                this.terminated = true;
                this.task = None;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S> FusedStream for StateStream<S> {
    fn is_terminated(&self) -> bool {
        self.terminated
    }
}

impl<S> fmt::Debug for StateStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateStream")
            .field("started", &self.pending.is_none())
            .field("task", &self.task)
            .field("terminated", &self.terminated)
            .finish()
    }
}
