//! Run an effect on a scheduler and forward its events.
//!
//! [`Enqueued`] is lazy. Nothing is scheduled until the stream is first
//! polled, and the scheduled task yields once before it subscribes to the
//! effect, so an effect that is started and immediately cancelled never
//! begins its side effect. Results travel through a channel, which makes
//! every undelivered result cancelable: dropping the stream aborts the task
//! and discards whatever is still buffered.

use std::fmt;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{FutureExt, StreamExt};
use futures_core::{FusedStream, Stream};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::feedback::EffectStream;
use crate::metrics::FeedbackMetrics;
use crate::scheduler::{Scheduled, Scheduler, SharedScheduler};

/// Enqueue `effect` on `scheduler`.
///
/// The first error produced by the effect ends the returned stream without
/// surfacing the error.
pub fn enqueue<E, Sch>(effect: EffectStream<E>, scheduler: Sch) -> Enqueued<E>
where
    E: Send + 'static,
    Sch: Scheduler,
{
    Enqueued {
        state: EnqueuedState::Idle {
            effect,
            scheduler: Arc::new(scheduler),
        },
        metrics: None,
    }
}

/// Events of an effect running on a scheduler.
///
/// Returned by [`enqueue`] and [`SchedulerContext::enqueue`](crate::SchedulerContext::enqueue).
#[must_use = "streams do nothing unless polled"]
pub struct Enqueued<E> {
    state: EnqueuedState<E>,
    metrics: Option<FeedbackMetrics>,
}

enum EnqueuedState<E> {
    Idle {
        effect: EffectStream<E>,
        scheduler: SharedScheduler,
    },
    Running {
        task: Scheduled,
        results: mpsc::UnboundedReceiver<E>,
    },
    Done,
}

impl<E> Unpin for Enqueued<E> {}

impl<E: Send + 'static> Enqueued<E> {
    /// Like [`enqueue`], recording the effect's lifecycle in `metrics`.
    pub fn with_metrics(
        effect: EffectStream<E>,
        scheduler: SharedScheduler,
        metrics: FeedbackMetrics,
    ) -> Self {
        Self {
            state: EnqueuedState::Idle { effect, scheduler },
            metrics: Some(metrics),
        }
    }

    fn start(&mut self, mut effect: EffectStream<E>, scheduler: SharedScheduler) {
        let (tx, rx) = mpsc::unbounded_channel();
        let metrics = self.metrics.clone();
        if let Some(metrics) = &metrics {
            metrics.effect_started();
        }
        debug!(scheduler = scheduler.name(), "starting effect");

        let task = async move {
            // Leave room for a cancellation before the effect is subscribed.
            tokio::task::yield_now().await;

            while let Some(item) = effect.next().await {
                match item {
                    Ok(event) => {
                        if tx.send(event).is_err() {
                            return;
                        }
                    }
                    Err(error) => {
                        warn!(%error, "effect failed, ending it");
                        if let Some(metrics) = &metrics {
                            metrics.effect_failures.inc();
                        }
                        return;
                    }
                }
            }
        };

        self.state = EnqueuedState::Running {
            task: scheduler.schedule(task.boxed()),
            results: rx,
        };
    }

    fn finish(&mut self) {
        self.state = EnqueuedState::Done;
        if let Some(metrics) = &self.metrics {
            metrics.effect_stopped(false);
        }
    }
}

impl<E: Send + 'static> Stream for Enqueued<E> {
    type Item = E;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<E>> {
        let this = &mut *self;

        if matches!(this.state, EnqueuedState::Idle { .. }) {
            if let EnqueuedState::Idle { effect, scheduler } =
                mem::replace(&mut this.state, EnqueuedState::Done)
            {
                this.start(effect, scheduler);
            }
        }

        let EnqueuedState::Running { task, results } = &mut this.state else {
            return Poll::Ready(None);
        };

        // Drives inline work; for spawned work this only registers interest.
        let _ = Pin::new(task).poll(cx);

        match results.poll_recv(cx) {
            Poll::Ready(Some(event)) => Poll::Ready(Some(event)),
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<E: Send + 'static> FusedStream for Enqueued<E> {
    fn is_terminated(&self) -> bool {
        matches!(self.state, EnqueuedState::Done)
    }
}

impl<E> Drop for Enqueued<E> {
    fn drop(&mut self) {
        if let EnqueuedState::Running { task, .. } = &self.state {
            let cancelled = !task.is_finished();
            if cancelled {
                debug!("cancelling effect");
            }
            if let Some(metrics) = &self.metrics {
                metrics.effect_stopped(cancelled);
            }
        }
    }
}

impl<E> fmt::Debug for Enqueued<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            EnqueuedState::Idle { .. } => "idle",
            EnqueuedState::Running { .. } => "running",
            EnqueuedState::Done => "done",
        };
        f.debug_struct("Enqueued").field("state", &state).finish()
    }
}
