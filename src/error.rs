//! Error types for feedback-rs.

use thiserror::Error;

/// Boxed error produced by fallible accumulators and effects.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by feedback loops and the feedback runtime.
#[derive(Debug, Error)]
pub enum FeedbackError {
    /// The accumulator rejected an event. Terminal for the loop that hit it.
    #[error("accumulator failed: {0}")]
    Reduce(#[source] BoxError),

    /// No feedback runtime (or tokio runtime) is active on the calling thread.
    #[error("no runtime is active on this thread")]
    NoRuntime,

    /// Error extracting configuration from figment.
    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Error building tokio runtime.
    #[error("failed to build tokio runtime: {0}")]
    TokioRuntime(#[from] std::io::Error),

    /// Error building rayon thread pool.
    #[error("failed to build rayon thread pool: {0}")]
    RayonThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// A thread pool was configured with zero threads.
    #[error("the {0} pool needs at least one thread")]
    NoThreads(&'static str),
}

/// Result type alias for feedback-rs operations.
pub type Result<T> = std::result::Result<T, FeedbackError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_reduce_error_keeps_source() {
        let err = FeedbackError::Reduce("state overflow".into());
        assert_eq!(err.to_string(), "accumulator failed: state overflow");
        assert_eq!(err.source().unwrap().to_string(), "state overflow");
    }

    #[test]
    fn test_no_threads_message() {
        let err = FeedbackError::NoThreads("rayon");
        assert_eq!(err.to_string(), "the rayon pool needs at least one thread");
    }
}
