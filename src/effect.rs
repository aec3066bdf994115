//! Constructors for [`EffectStream`]s.
//!
//! Effects are plain streams of `Result<E, BoxError>`; these helpers cover the
//! common shapes. An effect does nothing until an adapter enqueues it.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::stream::{self, Stream};
use futures::{FutureExt, StreamExt, TryFutureExt};

use crate::context::current_runtime;
use crate::error::{BoxError, FeedbackError};
use crate::feedback::EffectStream;

/// An effect that emits `event` and completes.
pub fn once<E: Send + 'static>(event: E) -> EffectStream<E> {
    stream::once(async move { Ok(event) }).boxed()
}

/// An effect that emits the output of `future` and completes.
///
/// An `Err` output fails the effect.
pub fn from_future<E, Err, Fut>(future: Fut) -> EffectStream<E>
where
    E: Send + 'static,
    Err: Into<BoxError> + 'static,
    Fut: Future<Output = Result<E, Err>> + Send + 'static,
{
    future.map_err(Into::into).into_stream().boxed()
}

/// An effect that emits every item of `events`.
pub fn from_stream<E, St>(events: St) -> EffectStream<E>
where
    E: Send + 'static,
    St: Stream<Item = E> + Send + 'static,
{
    events.map(Ok).boxed()
}

/// An effect that fails immediately with `error`.
pub fn fail<E: Send + 'static>(error: impl Into<BoxError>) -> EffectStream<E> {
    let error = error.into();
    stream::once(async move { Err(error) }).boxed()
}

/// An effect that runs `f` on the rayon pool of the current feedback runtime.
///
/// The runtime is looked up when the effect is subscribed, which happens on
/// the scheduler that runs it. Outside a feedback runtime the effect fails
/// with [`FeedbackError::NoRuntime`]. A panic in `f` fails the effect with the
/// panic message. The closure is not cancelled by dropping the effect; its
/// result is discarded instead.
pub fn compute<E, Err, F>(f: F) -> EffectStream<E>
where
    E: Send + 'static,
    Err: Into<BoxError> + Send + 'static,
    F: FnOnce() -> Result<E, Err> + Send + 'static,
{
    async move {
        let Some(runtime) = current_runtime() else {
            return Err(BoxError::from(FeedbackError::NoRuntime));
        };
        let task = runtime.spawn_compute(f);
        // Not held across the await.
        drop(runtime);
        match AssertUnwindSafe(task).catch_unwind().await {
            Ok(result) => result.map_err(Into::<BoxError>::into),
            Err(payload) => Err(BoxError::from(format!(
                "compute effect panicked: {}",
                panic_message(payload.as_ref())
            ))),
        }
    }
    .into_stream()
    .boxed()
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::FeedbackRuntime;
    use crate::FeedbackConfig;

    #[tokio::test]
    async fn test_once_emits_single_event() {
        let events: Vec<_> = once(5).collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(*events[0].as_ref().unwrap(), 5);
    }

    #[tokio::test]
    async fn test_from_future_error_fails_effect() {
        let mut effect = from_future(async { Err::<i32, _>("lost connection") });
        let error = effect.next().await.unwrap().unwrap_err();
        assert_eq!(error.to_string(), "lost connection");
        assert!(effect.next().await.is_none());
    }

    #[tokio::test]
    async fn test_from_stream_wraps_items() {
        let events: Vec<i32> = from_stream(stream::iter(vec![1, 2]))
            .map(|item| item.unwrap())
            .collect()
            .await;
        assert_eq!(events, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_fail() {
        let mut effect = fail::<()>("nope");
        assert_eq!(effect.next().await.unwrap().unwrap_err().to_string(), "nope");
    }

    #[tokio::test]
    async fn test_compute_outside_runtime_fails() {
        let mut effect = compute(|| Ok::<_, BoxError>(1));
        let error = effect.next().await.unwrap().unwrap_err();
        assert!(error.to_string().contains("no runtime"));
    }

    #[test]
    fn test_compute_on_runtime() {
        let config = FeedbackConfig {
            tokio_threads: Some(1),
            rayon_threads: Some(1),
            ..FeedbackConfig::default()
        };
        let runtime = FeedbackRuntime::from_config(config).unwrap();

        let result = runtime.block_on(async {
            let mut effect = compute(|| Ok::<_, BoxError>((1..=10).product::<u64>()));
            effect.next().await.unwrap().unwrap()
        });
        assert_eq!(result, 3_628_800);
        runtime.block_until_idle();
    }

    #[test]
    fn test_compute_panic_fails_effect() {
        let config = FeedbackConfig {
            tokio_threads: Some(1),
            rayon_threads: Some(1),
            ..FeedbackConfig::default()
        };
        let runtime = FeedbackRuntime::from_config(config).unwrap();

        let (error, after) = runtime.block_on(async {
            let mut effect = compute(|| -> Result<u32, BoxError> { panic!("bad input") });
            let error = effect.next().await.unwrap().unwrap_err();
            // The pool survives the panic.
            let after = runtime.spawn_compute(|| 7).await;
            (error, after)
        });
        assert_eq!(error.to_string(), "compute effect panicked: bad input");
        assert_eq!(after, 7);
        runtime.block_until_idle();
        assert_eq!(runtime.compute_tasks_in_flight(), 0);
    }

    #[test]
    fn test_panic_message_formats() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let fixed: Box<dyn Any + Send> = Box::new("fixed");
        let other: Box<dyn Any + Send> = Box::new(3u8);
        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(fixed.as_ref()), "fixed");
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }
}
