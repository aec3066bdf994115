//! Async-to-rayon bridge.
//!
//! [`ComputeTask`] is the future side of a closure running on the rayon pool.
//! The rayon side holds a [`TaskCompletion`] and hands the result over through
//! a shared slot, waking the awaiting task through an atomic waker instead of
//! a channel.
//!
//! A panic in the closure is carried over as its payload and resumed in the
//! task that polls the [`ComputeTask`], so it never unwinds a rayon worker.

use std::any::Any;
use std::future::Future;
use std::panic;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use diatomic_waker::DiatomicWaker;
use parking_lot::Mutex;

/// A future resolving to the result of work spawned on rayon.
#[must_use = "futures do nothing unless polled"]
pub struct ComputeTask<R> {
    state: Arc<TaskState<R>>,
}

type Outcome<R> = Result<R, Box<dyn Any + Send>>;

struct TaskState<R> {
    result: Mutex<Option<Outcome<R>>>,
    waker: DiatomicWaker,
}

impl<R> ComputeTask<R> {
    /// Create a task and the handle that completes it.
    #[inline]
    pub(crate) fn new() -> (Self, TaskCompletion<R>) {
        let state = Arc::new(TaskState {
            result: Mutex::new(None),
            waker: DiatomicWaker::new(),
        });
        (
            ComputeTask {
                state: state.clone(),
            },
            TaskCompletion { state },
        )
    }
}

impl<R> Future for ComputeTask<R> {
    type Output = R;

    #[inline]
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<R> {
        if let Some(result) = self.state.result.lock().take() {
            return Poll::Ready(unwrap_or_resume_panic(result));
        }

        // SAFETY: a ComputeTask is polled by one task at a time, so `register`
        // is never called concurrently for the same waker.
        unsafe {
            self.state.waker.register(cx.waker());
        }

        // Completion may have landed between the first check and registration.
        if let Some(result) = self.state.result.lock().take() {
            Poll::Ready(unwrap_or_resume_panic(result))
        } else {
            Poll::Pending
        }
    }
}

#[inline]
fn unwrap_or_resume_panic<R>(result: Outcome<R>) -> R {
    match result {
        Ok(value) => value,
        Err(payload) => panic::resume_unwind(payload),
    }
}

/// Handle used by the rayon thread to complete a [`ComputeTask`].
pub(crate) struct TaskCompletion<R> {
    state: Arc<TaskState<R>>,
}

impl<R> TaskCompletion<R> {
    /// Store the result and wake the awaiting future.
    #[inline]
    pub(crate) fn complete(self, result: R) {
        self.complete_with(Ok(result));
    }

    /// Store a panic payload; polling the future resumes the panic.
    #[inline]
    pub(crate) fn complete_with_panic(self, payload: Box<dyn Any + Send>) {
        self.complete_with(Err(payload));
    }

    fn complete_with(self, outcome: Outcome<R>) {
        *self.state.result.lock() = Some(outcome);
        self.state.waker.notify();
    }
}
