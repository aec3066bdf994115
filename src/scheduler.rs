//! Scheduling capability for loop and effect work.
//!
//! A [`Scheduler`] decides where a unit of work runs. The loop itself and every
//! enqueued effect are handed to a scheduler as a boxed future, and the
//! scheduler returns a [`Scheduled`] handle that owns the work:
//!
//! - [`ImmediateScheduler`] keeps the work inline. It runs on the execution
//!   context of whoever polls the handle, i.e. the consumer of the stream.
//! - [`TokioScheduler`] spawns the work onto a tokio runtime handle.
//! - [`RuntimeScheduler`](crate::runtime::RuntimeScheduler) spawns tracked work
//!   onto a [`FeedbackRuntime`](crate::FeedbackRuntime).
//!
//! Dropping a [`Scheduled`] handle cancels the work it owns. There is no
//! process-wide default scheduler; every loop names the scheduler it runs on.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::{FeedbackError, Result};

/// Shared, type-erased scheduler handed to feedback functions.
pub type SharedScheduler = Arc<dyn Scheduler>;

/// Capability that runs units of work, either inline or asynchronously.
pub trait Scheduler: Send + Sync + 'static {
    /// Take ownership of `task` and run it on this scheduler.
    ///
    /// The work is cancelled when the returned handle is dropped.
    fn schedule(&self, task: BoxFuture<'static, ()>) -> Scheduled;

    /// Short name used in tracing spans.
    fn name(&self) -> &str;
}

impl<T: Scheduler + ?Sized> Scheduler for Arc<T> {
    fn schedule(&self, task: BoxFuture<'static, ()>) -> Scheduled {
        (**self).schedule(task)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Handle to work handed to a [`Scheduler`].
///
/// Polling the handle drives inline work and observes completion of spawned
/// work. Dropping it aborts spawned work and drops inline work in place.
#[must_use = "dropping a Scheduled handle cancels its work"]
pub struct Scheduled {
    inner: ScheduledInner,
}

enum ScheduledInner {
    Inline(BoxFuture<'static, ()>),
    Spawned(JoinHandle<()>),
    Done,
}

impl Scheduled {
    /// Work that runs when the handle is polled.
    pub fn inline(task: BoxFuture<'static, ()>) -> Self {
        Self {
            inner: ScheduledInner::Inline(task),
        }
    }

    /// Work already spawned onto a tokio runtime.
    pub fn spawned(handle: JoinHandle<()>) -> Self {
        Self {
            inner: ScheduledInner::Spawned(handle),
        }
    }

    /// A handle whose work was dropped without running.
    pub fn done() -> Self {
        Self {
            inner: ScheduledInner::Done,
        }
    }

    /// Whether the owned work has run to completion (or was never run).
    pub fn is_finished(&self) -> bool {
        match &self.inner {
            ScheduledInner::Inline(_) => false,
            ScheduledInner::Spawned(handle) => handle.is_finished(),
            ScheduledInner::Done => true,
        }
    }
}

impl Future for Scheduled {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        match &mut self.inner {
            ScheduledInner::Inline(task) => ready!(task.as_mut().poll(cx)),
            ScheduledInner::Spawned(handle) => {
                // Cancellation and panics both count as completion here.
                let _ = ready!(Pin::new(handle).poll(cx));
            }
            ScheduledInner::Done => return Poll::Ready(()),
        }
        self.inner = ScheduledInner::Done;
        Poll::Ready(())
    }
}

impl Drop for Scheduled {
    fn drop(&mut self) {
        if let ScheduledInner::Spawned(handle) = &self.inner {
            handle.abort();
        }
    }
}

impl fmt::Debug for Scheduled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.inner {
            ScheduledInner::Inline(_) => "inline",
            ScheduledInner::Spawned(_) => "spawned",
            ScheduledInner::Done => "done",
        };
        f.debug_struct("Scheduled").field("kind", &kind).finish()
    }
}

/// Runs work on the execution context that polls the handle.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateScheduler;

impl Scheduler for ImmediateScheduler {
    fn schedule(&self, task: BoxFuture<'static, ()>) -> Scheduled {
        Scheduled::inline(task)
    }

    fn name(&self) -> &str {
        "immediate"
    }
}

/// Spawns work onto a tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    /// Create a scheduler for the given runtime handle.
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Create a scheduler for the tokio runtime the caller is running in.
    ///
    /// # Errors
    ///
    /// Returns [`FeedbackError::NoRuntime`] outside a tokio runtime.
    pub fn current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|_| FeedbackError::NoRuntime)
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, task: BoxFuture<'static, ()>) -> Scheduled {
        Scheduled::spawned(self.handle.spawn(task))
    }

    fn name(&self) -> &str {
        "tokio"
    }
}
