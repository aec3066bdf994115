//! Query/effect adapters.
//!
//! Both adapters build a [`Feedback`] out of two functions: a query that maps
//! each state to its control(s), and an effect factory that turns a control
//! into an [`EffectStream`]. The adapter owns the resulting effect
//! subscriptions and starts, keeps or cancels them as the controls change.
//!
//! - [`react`]: one optional control, latest wins.
//! - [`react_set`]: a set of controls, one independent effect per control.
//!
//! Both adapters drain every state that is already available before they poll
//! their effects, so a control that is superseded within the same batch of
//! states never starts its effect.

use std::collections::HashMap;
use std::collections::HashSet;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::StreamExt;
use futures_core::Stream;
use tracing::trace;

use crate::enqueue::Enqueued;
use crate::feedback::{EffectStream, Feedback, SchedulerContext, StateSource};
use crate::metrics::FeedbackMetrics;
use crate::scheduler::SharedScheduler;

/// Feedback that runs one effect for the latest distinct control.
///
/// `query` is applied to every state. Consecutive equal controls are ignored,
/// including consecutive `None`s. When the control changes, the running effect
/// is dropped without waiting for it; a new `Some(control)` then starts
/// `effects(control)` on the loop's scheduler.
pub fn react<S, C, E, Q, F>(query: Q, effects: F) -> Feedback<S, E>
where
    S: Send + 'static,
    C: PartialEq + Clone + Send + 'static,
    E: Send + 'static,
    Q: Fn(&S) -> Option<C> + Send + Sync + 'static,
    F: Fn(C) -> EffectStream<E> + Send + Sync + 'static,
{
    let query = Arc::new(query);
    let effects = Arc::new(effects);
    Feedback::new(move |context: SchedulerContext<S>| {
        React {
            source: Some(context.source),
            scheduler: context.scheduler,
            metrics: context.metrics,
            query: Arc::clone(&query),
            effects: Arc::clone(&effects),
            last: None,
            current: None,
        }
        .boxed()
    })
}

struct React<S, C, E, Q, F> {
    source: Option<StateSource<S>>,
    scheduler: SharedScheduler,
    metrics: FeedbackMetrics,
    query: Arc<Q>,
    effects: Arc<F>,
    // `None` until the first state; then the last observed control.
    last: Option<Option<C>>,
    current: Option<Enqueued<E>>,
}

impl<S, C, E, Q, F> Unpin for React<S, C, E, Q, F> {}

impl<S, C, E, Q, F> React<S, C, E, Q, F>
where
    S: Send + 'static,
    C: PartialEq + Clone,
    E: Send + 'static,
    Q: Fn(&S) -> Option<C>,
    F: Fn(C) -> EffectStream<E>,
{
    fn observe(&mut self, state: &S) {
        let control = (self.query)(state);
        if self.last.as_ref() == Some(&control) {
            return;
        }

        if self.current.take().is_some() {
            trace!("control changed, dropping running effect");
        }
        if let Some(control) = control.clone() {
            self.current = Some(Enqueued::with_metrics(
                (self.effects)(control),
                Arc::clone(&self.scheduler),
                self.metrics.clone(),
            ));
        }
        self.last = Some(control);
    }
}

impl<S, C, E, Q, F> Stream for React<S, C, E, Q, F>
where
    S: Send + 'static,
    C: PartialEq + Clone,
    E: Send + 'static,
    Q: Fn(&S) -> Option<C>,
    F: Fn(C) -> EffectStream<E>,
{
    type Item = E;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<E>> {
        let this = &mut *self;

        while let Some(source) = this.source.as_mut() {
            match source.poll_next_unpin(cx) {
                Poll::Ready(Some(state)) => this.observe(&state),
                Poll::Ready(None) => this.source = None,
                Poll::Pending => break,
            }
        }

        if let Some(current) = this.current.as_mut() {
            match current.poll_next_unpin(cx) {
                Poll::Ready(Some(event)) => return Poll::Ready(Some(event)),
                Poll::Ready(None) => this.current = None,
                Poll::Pending => return Poll::Pending,
            }
        }

        if this.source.is_none() {
            Poll::Ready(None)
        } else {
            Poll::Pending
        }
    }
}

/// Feedback that runs one independent effect per control in a set.
///
/// For every control that appears in `query(state)` and was absent from the
/// previous state's set, `effects(control)` is started. A control's effect is
/// dropped as soon as the control leaves the set. A control whose effect
/// already completed is not restarted while it stays in the set.
pub fn react_set<S, C, E, Q, F>(query: Q, effects: F) -> Feedback<S, E>
where
    S: Send + 'static,
    C: Eq + Hash + Clone + Send + 'static,
    E: Send + 'static,
    Q: Fn(&S) -> HashSet<C> + Send + Sync + 'static,
    F: Fn(C) -> EffectStream<E> + Send + Sync + 'static,
{
    let query = Arc::new(query);
    let effects = Arc::new(effects);
    Feedback::new(move |context: SchedulerContext<S>| {
        ReactSet {
            source: Some(context.source),
            scheduler: context.scheduler,
            metrics: context.metrics,
            query: Arc::clone(&query),
            effects: Arc::clone(&effects),
            active: HashMap::new(),
            cursor: 0,
        }
        .boxed()
    })
}

struct ReactSet<S, C, E, Q, F> {
    source: Option<StateSource<S>>,
    scheduler: SharedScheduler,
    metrics: FeedbackMetrics,
    query: Arc<Q>,
    effects: Arc<F>,
    // A `None` slot is a control whose effect has completed.
    active: HashMap<C, Option<Enqueued<E>>>,
    // Where the next poll starts walking `active`, so a busy effect cannot
    // starve the ones after it.
    cursor: usize,
}

impl<S, C, E, Q, F> Unpin for ReactSet<S, C, E, Q, F> {}

impl<S, C, E, Q, F> ReactSet<S, C, E, Q, F>
where
    S: Send + 'static,
    C: Eq + Hash + Clone,
    E: Send + 'static,
    Q: Fn(&S) -> HashSet<C>,
    F: Fn(C) -> EffectStream<E>,
{
    fn observe(&mut self, state: &S) {
        let controls = (self.query)(state);

        let before = self.active.len();
        self.active.retain(|control, _| controls.contains(control));
        let removed = before - self.active.len();
        if removed > 0 {
            trace!(removed, "controls left the set, dropping their effects");
        }

        for control in controls {
            if self.active.contains_key(&control) {
                continue;
            }
            let effect = (self.effects)(control.clone());
            let enqueued =
                Enqueued::with_metrics(effect, Arc::clone(&self.scheduler), self.metrics.clone());
            self.active.insert(control, Some(enqueued));
        }
    }
}

impl<S, C, E, Q, F> Stream for ReactSet<S, C, E, Q, F>
where
    S: Send + 'static,
    C: Eq + Hash + Clone,
    E: Send + 'static,
    Q: Fn(&S) -> HashSet<C>,
    F: Fn(C) -> EffectStream<E>,
{
    type Item = E;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<E>> {
        let this = &mut *self;

        while let Some(source) = this.source.as_mut() {
            match source.poll_next_unpin(cx) {
                Poll::Ready(Some(state)) => this.observe(&state),
                Poll::Ready(None) => this.source = None,
                Poll::Pending => break,
            }
        }

        let start = match this.active.len() {
            0 => 0,
            len => this.cursor % len,
        };
        this.cursor = this.cursor.wrapping_add(1);

        let mut live = false;
        for slot in this.active.values_mut().skip(start) {
            if let Some(event) = poll_slot(slot, cx, &mut live) {
                return Poll::Ready(Some(event));
            }
        }
        for slot in this.active.values_mut().take(start) {
            if let Some(event) = poll_slot(slot, cx, &mut live) {
                return Poll::Ready(Some(event));
            }
        }

        if this.source.is_none() && !live {
            Poll::Ready(None)
        } else {
            Poll::Pending
        }
    }
}

/// Poll one effect slot, clearing it once the effect completes.
fn poll_slot<E: Send + 'static>(
    slot: &mut Option<Enqueued<E>>,
    cx: &mut Context<'_>,
    live: &mut bool,
) -> Option<E> {
    let enqueued = slot.as_mut()?;
    match enqueued.poll_next_unpin(cx) {
        Poll::Ready(Some(event)) => Some(event),
        Poll::Ready(None) => {
            *slot = None;
            None
        }
        Poll::Pending => {
            *live = true;
            None
        }
    }
}
