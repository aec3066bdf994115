//! Thread-local runtime context.
//!
//! Threads managed by a [`FeedbackRuntime`] (tokio workers, rayon workers, and
//! the caller of `block_on`) can reach their runtime without it being passed
//! around. Effects such as [`effect::compute`](crate::effect::compute) rely on
//! this to find the rayon pool.
//!
//! Worker threads may start before the runtime is fully assembled, so each
//! thread holds a shared slot that is filled once the runtime exists.

use std::cell::RefCell;
use std::sync::{Arc, OnceLock, Weak};

use crate::runtime::{FeedbackRuntime, FeedbackRuntimeInner};

/// Slot shared by every thread of one runtime.
pub(crate) type RuntimeSlot = Arc<OnceLock<Weak<FeedbackRuntimeInner>>>;

thread_local! {
    static CURRENT_RUNTIME: RefCell<Option<RuntimeSlot>> = const { RefCell::new(None) };
}

/// Get the feedback runtime of the current thread.
///
/// Returns `Some` on threads managed by a [`FeedbackRuntime`] and inside its
/// `block_on`, `None` everywhere else.
pub fn current_runtime() -> Option<FeedbackRuntime> {
    CURRENT_RUNTIME.with(|rt| {
        rt.borrow()
            .as_ref()
            .and_then(|slot| slot.get())
            .and_then(Weak::upgrade)
            .map(FeedbackRuntime::from_inner)
    })
}

/// Set the runtime slot for this thread, returning the previous one.
pub(crate) fn set_current_runtime(slot: RuntimeSlot) -> Option<RuntimeSlot> {
    CURRENT_RUNTIME.with(|rt| rt.borrow_mut().replace(slot))
}

/// Restore the slot that was active before [`set_current_runtime`].
pub(crate) fn restore_current_runtime(previous: Option<RuntimeSlot>) {
    CURRENT_RUNTIME.with(|rt| *rt.borrow_mut() = previous);
}

/// Clear the runtime slot for this thread.
pub(crate) fn clear_current_runtime() {
    restore_current_runtime(None);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_runtime_none_initially() {
        assert!(current_runtime().is_none());
    }

    #[test]
    fn test_empty_slot_is_none() {
        let previous = set_current_runtime(Arc::new(OnceLock::new()));
        assert!(previous.is_none());
        // The slot exists but the runtime was never stored.
        assert!(current_runtime().is_none());

        clear_current_runtime();
        assert!(current_runtime().is_none());
    }

    #[test]
    fn test_dropped_runtime_is_none() {
        let slot: RuntimeSlot = Arc::new(OnceLock::new());
        let _ = slot.set(Weak::new());
        set_current_runtime(slot);
        assert!(current_runtime().is_none());
        clear_current_runtime();
    }
}
