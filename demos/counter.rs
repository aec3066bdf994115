//! Counter Example
//!
//! A loop whose state counts up while a ticking effect is enabled, and a
//! second loop that drains a set of simulated downloads, each running as its
//! own effect.
//!
//! Run: cargo run --example counter -- --target 5 --feedback-tokio-threads 2
//!
//! Set `RUST_LOG=feedback_rs=debug` to see loop and effect lifecycles.

use std::collections::HashSet;
use std::time::Duration;

use clap::Parser;
use feedback_rs::{
    effect, react, react_set, BoxError, EffectStream, FeedbackArgs, FeedbackBuilder, System,
};
use futures::{stream, StreamExt};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Feedback loop counter demo")]
struct Args {
    /// Count up to this value
    #[arg(long, default_value_t = 3)]
    target: u32,

    /// Milliseconds between ticks
    #[arg(long, default_value_t = 100)]
    tick_ms: u64,

    /// Number of simulated downloads
    #[arg(long, default_value_t = 4)]
    downloads: u32,

    #[command(flatten)]
    feedback: FeedbackArgs,
}

#[derive(Clone, Debug)]
struct Counter {
    value: u32,
    target: u32,
}

fn ticker(period: Duration) -> EffectStream<u32> {
    stream::unfold((), move |()| async move {
        tokio::time::sleep(period).await;
        Some((Ok(1), ()))
    })
    .boxed()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let runtime = FeedbackBuilder::new()
        .prefix("counter")
        .env_prefix("FEEDBACK")
        .with_cli_args(&args.feedback)
        .build()?;
    println!("{}", runtime);

    let period = Duration::from_millis(args.tick_ms);
    let counter = System::new(
        Counter {
            value: 0,
            target: args.target,
        },
        |state: Counter, delta: u32| Counter {
            value: state.value + delta,
            ..state
        },
    )
    .metrics(runtime.metrics().clone())
    .feedback(react(
        |state: &Counter| (state.value < state.target).then_some(true),
        move |_| ticker(period),
    ));

    let downloads = System::new(
        (0..args.downloads).collect::<HashSet<u32>>(),
        |mut pending: HashSet<u32>, finished: u32| {
            pending.remove(&finished);
            pending
        },
    )
    .metrics(runtime.metrics().clone())
    .feedback(react_set(
        |pending: &HashSet<u32>| pending.clone(),
        move |id: u32| {
            effect::from_future(async move {
                tokio::time::sleep(period * (id + 1)).await;
                Ok::<_, BoxError>(id)
            })
        },
    ));

    runtime.block_on(async {
        let mut states = counter.run(runtime.scheduler());
        while let Some(state) = states.next().await {
            let state = state?;
            println!("counter: {}", state.value);
            if state.value >= state.target {
                break;
            }
        }

        let mut states = downloads.run(runtime.scheduler());
        while let Some(state) = states.next().await {
            let mut pending: Vec<u32> = state?.into_iter().collect();
            pending.sort_unstable();
            println!("pending downloads: {:?}", pending);
            if pending.is_empty() {
                break;
            }
        }
        Ok::<_, Box<dyn std::error::Error>>(())
    })?;

    let metrics = runtime.metrics();
    println!(
        "loops started: {}, events folded: {}, effects started: {}, effects cancelled: {}",
        metrics.loops_started.get(),
        metrics.events_folded.get(),
        metrics.effects_started.get(),
        metrics.effects_cancelled.get(),
    );

    runtime.block_until_idle();
    Ok(())
}
