//! Bidirectional bindings.
//!
//! A binding is a feedback function that does two things at once: it renders
//! states somewhere (work that lives as long as the loop run) and it produces
//! events. [`Bindings`] carries both halves.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::{self, select_all, SelectAll};
use futures::StreamExt;
use futures_core::Stream;
use tracing::debug;

use crate::feedback::{EventStream, Feedback, SchedulerContext};
use crate::scheduler::Scheduled;

/// The two halves of a binding.
pub struct Bindings<E> {
    subscriptions: Vec<Scheduled>,
    events: Vec<EventStream<E>>,
}

impl<E: Send + 'static> Bindings<E> {
    /// Bindings holding `subscriptions` for the run and merging `events`.
    pub fn new(subscriptions: Vec<Scheduled>, events: Vec<EventStream<E>>) -> Self {
        Self {
            subscriptions,
            events,
        }
    }

    /// Bindings that hold nothing and produce no events.
    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    /// Merge the events, keeping the subscriptions alive while the stream is.
    ///
    /// Once the events are exhausted the stream stays open as long as any
    /// subscription is still running, and ends after that.
    pub fn into_stream(self) -> EventStream<E> {
        BoundEvents {
            subscriptions: self.subscriptions,
            events: select_all(self.events),
            events_done: false,
        }
        .boxed()
    }
}

impl<E> fmt::Debug for Bindings<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bindings")
            .field("subscriptions", &self.subscriptions.len())
            .field("events", &self.events.len())
            .finish()
    }
}

struct BoundEvents<E> {
    subscriptions: Vec<Scheduled>,
    events: SelectAll<EventStream<E>>,
    events_done: bool,
}

impl<E> Stream for BoundEvents<E> {
    type Item = E;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<E>> {
        let this = &mut *self;

        this.subscriptions
            .retain_mut(|subscription| Pin::new(subscription).poll(cx).is_pending());

        if !this.events_done {
            match this.events.poll_next_unpin(cx) {
                Poll::Ready(Some(event)) => return Poll::Ready(Some(event)),
                Poll::Ready(None) => this.events_done = true,
                Poll::Pending => return Poll::Pending,
            }
        }

        if this.subscriptions.is_empty() {
            Poll::Ready(None)
        } else {
            Poll::Pending
        }
    }
}

/// Feedback built from a binding function.
pub fn bind<S, E, F>(f: F) -> Feedback<S, E>
where
    S: Send + 'static,
    E: Send + 'static,
    F: Fn(SchedulerContext<S>) -> Bindings<E> + Send + Sync + 'static,
{
    Feedback::new(move |context| f(context).into_stream())
}

/// Feedback built from a binding function of a weakly held owner.
///
/// The owner is upgraded when a loop run subscribes. If it has been dropped by
/// then, the feedback produces no events and holds no subscriptions.
pub fn bind_weak<S, E, O, F>(owner: &Arc<O>, f: F) -> Feedback<S, E>
where
    S: Send + 'static,
    E: Send + 'static,
    O: Send + Sync + 'static,
    F: Fn(Arc<O>, SchedulerContext<S>) -> Bindings<E> + Send + Sync + 'static,
{
    let owner = Arc::downgrade(owner);
    Feedback::new(move |context| match owner.upgrade() {
        Some(owner) => f(owner, context).into_stream(),
        None => {
            debug!("binding owner dropped, feedback yields nothing");
            stream::empty().boxed()
        }
    })
}
