//! Basic telemetry integration example.
//!
//! Demonstrates how to route policy events to telemetry sinks by calling
//! `emit_best_effort` at the call site around a `RetryPolicy`, a
//! `CircuitBreakerPolicy`, and a `TimeoutPolicy`.

use relay_broker::error::BrokerError;
use relay_broker::telemetry::{
    emit_best_effort, CircuitBreakerEvent, LogSink, MemorySink, PolicyEvent, RequestOutcome,
    StreamingSink, TimeoutEvent,
};
use relay_broker::{Backoff, CircuitBreakerConfig, CircuitBreakerPolicy, RetryPolicy, TimeoutPolicy};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for LogSink
    tracing_subscriber::fmt::init();

    println!("=== Basic Telemetry Example ===\n");

    // Example 1: Retry with MemorySink
    println!("Example 1: Retry with MemorySink");
    let memory_sink = MemorySink::new();

    let retry_policy = RetryPolicy::builder()
        .max_attempts(3)
        .backoff(Backoff::constant(Duration::from_millis(100)))
        .build();

    let attempt = Arc::new(AtomicUsize::new(0));
    let counter = attempt.clone();
    let sink = memory_sink.clone();
    let result = retry_policy
        .execute(move || {
            let counter = counter.clone();
            let sink = sink.clone();
            async move {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                let result: Result<_, BrokerError> = if count < 1 {
                    Err(BrokerError::TransportFailure("temporary failure".into()))
                } else {
                    Ok("success!")
                };
                let event = match &result {
                    Ok(_) => PolicyEvent::Request(RequestOutcome::Success { duration: Duration::ZERO }),
                    Err(_) => PolicyEvent::Request(RequestOutcome::Failure { duration: Duration::ZERO }),
                };
                emit_best_effort(sink, event).await;
                result
            }
        })
        .await;
    println!("Result: {:?}", result);

    println!("\nCaptured telemetry events:");
    for event in memory_sink.events() {
        println!("  - {}", event);
    }

    // Example 2: Circuit breaker with LogSink
    println!("\n\nExample 2: Circuit breaker with LogSink");

    let circuit_config = CircuitBreakerConfig {
        failure_threshold: 2,
        timeout: Duration::from_secs(5),
        half_open_max_calls: 1,
        ..CircuitBreakerConfig::default()
    };
    let breaker = CircuitBreakerPolicy::with_config(circuit_config);

    let fail_count = Arc::new(AtomicUsize::new(0));

    // First two calls will fail
    for i in 1..=2 {
        println!("Call {}", i);
        let fail_count = fail_count.clone();
        let result = breaker
            .execute(move || {
                let fail_count = fail_count.clone();
                async move {
                    let count = fail_count.fetch_add(1, Ordering::SeqCst);
                    if count < 2 {
                        Err(BrokerError::TransportFailure("failing".into()))
                    } else {
                        Ok("recovered")
                    }
                }
            })
            .await;
        emit_best_effort(
            LogSink,
            match &result {
                Ok(_) => PolicyEvent::Request(RequestOutcome::Success { duration: Duration::ZERO }),
                Err(_) => PolicyEvent::Request(RequestOutcome::Failure { duration: Duration::ZERO }),
            },
        )
        .await;
    }

    // Circuit should now be open
    println!("Call 3 (circuit should be open)");
    let fail_count = fail_count.clone();
    let result = breaker
        .execute(move || {
            let fail_count = fail_count.clone();
            async move {
                let count = fail_count.fetch_add(1, Ordering::SeqCst);
                if count < 2 {
                    Err(BrokerError::TransportFailure("failing".into()))
                } else {
                    Ok("recovered")
                }
            }
        })
        .await;
    println!("Result: {:?}", result);
    emit_best_effort(LogSink, PolicyEvent::CircuitBreaker(CircuitBreakerEvent::Opened { failure_count: 2 })).await;

    // Example 3: Timeout with StreamingSink
    println!("\n\nExample 3: Timeout with StreamingSink");

    let streaming_sink = StreamingSink::new(100);
    let mut receiver = streaming_sink.subscribe();

    let timeout_policy = TimeoutPolicy::new(Duration::from_millis(50))?;

    // Spawn a task to print events as they arrive
    let event_printer = tokio::spawn(async move {
        while let Ok(event) = receiver.recv().await {
            println!("  [event] {}", event);
        }
    });

    println!("Fast request:");
    let fast = timeout_policy.execute(|| async { Ok::<_, BrokerError>("done") }).await;
    emit_best_effort(
        streaming_sink.clone(),
        match fast {
            Ok(_) => PolicyEvent::Request(RequestOutcome::Success { duration: Duration::ZERO }),
            Err(_) => PolicyEvent::Timeout(TimeoutEvent::Occurred { timeout: Duration::from_millis(50) }),
        },
    )
    .await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    println!("\nSlow request (will timeout):");
    let slow = timeout_policy
        .execute(|| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, BrokerError>("done")
        })
        .await;
    emit_best_effort(
        streaming_sink.clone(),
        match slow {
            Ok(_) => PolicyEvent::Request(RequestOutcome::Success { duration: Duration::ZERO }),
            Err(_) => PolicyEvent::Timeout(TimeoutEvent::Occurred { timeout: Duration::from_millis(50) }),
        },
    )
    .await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    // touch BulkheadEvent so the import isn't flagged if this example is trimmed further
    let _ = PolicyEvent::Bulkhead(BulkheadEvent::Acquired { active_count: 1 });

    // Clean shutdown
    drop(streaming_sink);
    event_printer.abort();

    Ok(())
}
