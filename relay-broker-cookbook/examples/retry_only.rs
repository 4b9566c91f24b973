//! Minimal, focused retry example with backoff, jitter, and a `should_retry` predicate.

use relay_broker::prelude::*;
use std::{
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum MyError {
    Retryable(&'static str),
    Fatal(&'static str),
}

impl fmt::Display for MyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MyError::Retryable(msg) => write!(f, "retryable: {}", msg),
            MyError::Fatal(msg) => write!(f, "fatal: {}", msg),
        }
    }
}

impl std::error::Error for MyError {}

fn to_broker_error(err: &MyError) -> BrokerError {
    match err {
        MyError::Retryable(msg) => BrokerError::TransportFailure(msg.to_string()),
        MyError::Fatal(msg) => BrokerError::InvalidArgument(msg.to_string()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Relay Broker: Retry-Only Example ===\n");

    // Policy: 4 total attempts, exponential backoff starting at 50ms, full jitter.
    // Retry policies classify on `BrokerError`, so a fatal, non-retriable error
    // from the underlying call is mapped to `InvalidArgument` and short-circuits.
    let retry_policy = RetryPolicy::builder()
        .max_attempts(4)
        .backoff(Backoff::exponential(Duration::from_millis(50), 2.0))
        .with_jitter(Jitter::full())
        .build();

    // Attach a MemorySink so we can print telemetry events at the end.
    let sink = MemorySink::new();

    // A flaky service: first two attempts are retryable failures, third succeeds.
    let attempt = Arc::new(AtomicUsize::new(0));

    println!("Calling flaky service (should succeed after retries)...");
    let counter = attempt.clone();
    let happy_sink = sink.clone();
    let ok = retry_policy
        .execute(move || {
            let counter = counter.clone();
            let sink = happy_sink.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let result = match n {
                    0 | 1 => Err(to_broker_error(&MyError::Retryable("transient upstream"))),
                    _ => Ok(format!("ok on attempt {}", n + 1)),
                };
                let outcome = match &result {
                    Ok(_) => PolicyEvent::Request(RequestOutcome::Success { duration: Duration::ZERO }),
                    Err(_) => PolicyEvent::Request(RequestOutcome::Failure { duration: Duration::ZERO }),
                };
                emit_best_effort(sink, outcome).await;
                result
            }
        })
        .await?;
    println!("Result: {}", ok);

    println!("\nCalling fatal path (should NOT retry)...");
    let fatal_sink = sink.clone();
    let err = retry_policy
        .execute(move || {
            let sink = fatal_sink.clone();
            async move {
                let result: Result<(), BrokerError> = Err(to_broker_error(&MyError::Fatal("do not retry")));
                emit_best_effort(sink, PolicyEvent::Request(RequestOutcome::Failure { duration: Duration::ZERO })).await;
                result
            }
        })
        .await
        .unwrap_err();
    println!("Fatal error returned immediately: {}", err);

    println!("\nTelemetry events (MemorySink):");
    for event in sink.events() {
        println!("  - {}", event);
    }

    Ok(())
}
