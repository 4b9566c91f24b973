//! Demonstrates composing telemetry sinks with `MulticastSink` and `FallbackSink`.
//!
//! - Goal: show how to fan out events to multiple sinks and fall back when a primary sink fails.
//! - Behavior: Multicast sends each event to memory + log; Fallback routes to a secondary sink on error.
//! - Expected output: printed events from the log sink, memory sink counts, and streamed events.
//! - Run with: `cargo run --example telemetry_composition`

use relay_broker::error::BrokerError;
use relay_broker::telemetry::{
    emit_best_effort, FallbackSink, LogSink, MemorySink, MulticastSink, PolicyEvent,
    RequestOutcome, StreamingSink,
};
use relay_broker::{Backoff, CircuitBreakerConfig, CircuitBreakerPolicy, RetryPolicy, TimeoutPolicy};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const STREAM_PROCESSING_POLL_DELAY_MS: u64 = 50; // Give the streaming task time to drain events before printing

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    println!("=== Telemetry Sink Composition Example ===\n");

    // Create multiple sinks
    let memory_sink = MemorySink::new();
    let log_sink = LogSink;

    // Example 1: MulticastSink - send events to both sinks
    println!("Example 1: MulticastSink (events go to both memory and log)");

    let multicast = MulticastSink::new(memory_sink.clone(), log_sink);

    let retry_policy = RetryPolicy::builder()
        .max_attempts(2)
        .backoff(Backoff::constant(Duration::from_millis(50)))
        .build();

    let attempt = Arc::new(AtomicUsize::new(0));
    let counter = attempt.clone();
    let sink = multicast.clone();
    let result = retry_policy
        .execute(move || {
            let counter = counter.clone();
            let sink = sink.clone();
            async move {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                let result: Result<_, BrokerError> = if count == 0 {
                    Err(BrokerError::TransportFailure("first attempt failed".into()))
                } else {
                    Ok("success")
                };
                let event = match &result {
                    Ok(_) => PolicyEvent::Request(RequestOutcome::Success { duration: Duration::ZERO }),
                    Err(_) => PolicyEvent::Request(RequestOutcome::Failure { duration: Duration::ZERO }),
                };
                emit_best_effort(sink, event).await;
                result
            }
        })
        .await?;
    println!("\nResult: {:?}", result);

    println!("\nEvents captured in MemorySink:");
    for event in memory_sink.events() {
        println!("  - {}", event);
    }

    // Example 2: FallbackSink - primary with fallback
    println!("\n\nExample 2: FallbackSink (try primary, fallback on error)");

    let memory_sink2 = MemorySink::new();
    let fallback_memory = MemorySink::new();

    // Note: in a real deployment the primary sink might be a remote service
    // that can fail. For this example, both sides are MemorySinks (which
    // never fail), so every event lands in the primary.
    let fallback = FallbackSink::new(memory_sink2.clone(), fallback_memory.clone());

    let circuit_config = CircuitBreakerConfig { failure_threshold: 3, timeout: Duration::from_secs(10), ..CircuitBreakerConfig::default() };
    let breaker = CircuitBreakerPolicy::with_config(circuit_config);

    let sink = fallback.clone();
    let result = breaker
        .execute(|| async { Ok::<_, BrokerError>("response") })
        .await;
    emit_best_effort(
        sink,
        match &result {
            Ok(_) => PolicyEvent::Request(RequestOutcome::Success { duration: Duration::ZERO }),
            Err(_) => PolicyEvent::Request(RequestOutcome::Failure { duration: Duration::ZERO }),
        },
    )
    .await;
    println!("Response: {}", result?);

    println!("Events in primary MemorySink: {}", memory_sink2.len());
    for event in memory_sink2.events() {
        println!("  - {}", event);
    }

    println!("\nEvents in fallback MemorySink: {}", fallback_memory.len());
    if fallback_memory.is_empty() {
        println!("  (empty - primary succeeded)");
    }

    // Example 3: Complex composition - multicast with streaming
    println!("\n\nExample 3: Complex composition (multicast + streaming)");

    let streaming_sink = StreamingSink::new(100);
    let mut receiver = streaming_sink.subscribe();
    let memory_sink3 = MemorySink::new();

    let complex_sink = MulticastSink::new(streaming_sink, memory_sink3.clone());

    let timeout_policy = TimeoutPolicy::new(Duration::from_millis(100))?;

    // Spawn event printer
    let event_printer = tokio::spawn(async move {
        println!("\nStreaming events:");
        while let Ok(event) = receiver.recv().await {
            println!("  [stream] {}", event);
        }
        tracing::trace!("streaming receiver closed; shutting down printer task");
    });

    let sink = complex_sink.clone();
    let result = timeout_policy.execute(|| async { Ok::<_, BrokerError>("fast response") }).await;
    emit_best_effort(
        sink,
        match &result {
            Ok(_) => PolicyEvent::Request(RequestOutcome::Success { duration: Duration::ZERO }),
            Err(_) => PolicyEvent::Request(RequestOutcome::Failure { duration: Duration::ZERO }),
        },
    )
    .await;
    println!("Streaming example response: {}", result?);

    tokio::time::sleep(Duration::from_millis(STREAM_PROCESSING_POLL_DELAY_MS)).await;

    println!("\nAlso stored in memory:");
    for event in memory_sink3.events() {
        println!("  [memory] {}", event);
    }

    // Cleanup: drop the sink that owns the streaming sender so the receiver loop ends.
    drop(complex_sink);
    if let Err(e) = event_printer.await {
        eprintln!("event printer task ended with error: {e}");
    }

    println!("\nTelemetry composition working successfully!");

    Ok(())
}
