//! Telemetry and observability for the broker's resilience policies.
//!
//! This module provides the event system that enables all policies to emit
//! structured telemetry. Events flow through `TelemetrySink` implementations
//! which can log, aggregate, or forward events to external systems.
//!
//! # Event Types
//!
//! Each policy type emits specific events:
//!
//! - **Retry**: `RetryAttempt`, `RetryExhausted`
//! - **Circuit Breaker**: `CircuitOpened`, `CircuitClosed`, `CircuitHalfOpen`
//! - **Bulkhead**: `BulkheadAcquired`, `BulkheadRejected`
//! - **Timeout**: `TimeoutOccurred`
//! - **All policies**: `RequestSuccess`, `RequestFailure`
//!
//! # Telemetry Sinks
//!
//! The `TelemetrySink` trait defines how events are consumed. It's implemented
//! as a `tower::Service<PolicyEvent>` for composability.
//!
//! ```rust
//! use relay_broker::telemetry::{PolicyEvent, RetryEvent, RequestOutcome};
//! use std::time::Duration;
//!
//! // Events emitted during policy execution
//! let retry_attempt = PolicyEvent::Retry(RetryEvent::Attempt {
//!     attempt: 1,
//!     delay: Duration::from_millis(100),
//! });
//!
//! let request_success = PolicyEvent::Request(RequestOutcome::Success {
//!     duration: Duration::from_millis(50),
//! });
//! ```
//!
//! # OpenTelemetry surface
//!
//! [`names`] holds the process-wide tracer/meter identity and the attribute,
//! event, and metric name constants the broker pipeline and saga orchestrator
//! stamp onto spans and counters. [`tracer()`] and [`meter()`] hand back the
//! lazily-initialized, process-wide instruments built from those names.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Names and identifiers for the broker's OpenTelemetry surface.
///
/// Kept as plain `&'static str` constants rather than an enum: spans and
/// metrics are addressed by string at the OpenTelemetry API boundary, and
/// callers (backend adapters, the saga orchestrator) need to reference them
/// directly when building attributes.
pub mod names {
    /// Instrumentation scope name shared by the tracer and the meter.
    pub const INSTRUMENTATION_NAME: &str = "Relay.MessageBroker";
    /// Instrumentation scope version, bumped alongside breaking wire/event changes.
    pub const INSTRUMENTATION_VERSION: &str = "1.0.0";

    // Span/event attribute keys.
    pub const ATTR_MESSAGING_SYSTEM: &str = "messaging.system";
    pub const ATTR_MESSAGING_DESTINATION: &str = "messaging.destination";
    pub const ATTR_MESSAGING_OPERATION: &str = "messaging.operation";
    pub const ATTR_MESSAGE_TYPE: &str = "relay.message.type";
    pub const ATTR_MESSAGE_COMPRESSED: &str = "relay.message.compressed";
    pub const ATTR_CIRCUIT_BREAKER_STATE: &str = "relay.circuit_breaker.state";

    // Span event names.
    pub const EVENT_MESSAGE_PUBLISHED: &str = "message.published";
    pub const EVENT_MESSAGE_RECEIVED: &str = "message.received";
    pub const EVENT_MESSAGE_PROCESSED: &str = "message.processed";
    pub const EVENT_CIRCUIT_BREAKER_OPENED: &str = "circuit_breaker.opened";

    // Metric instrument names.
    pub const METRIC_MESSAGES_PUBLISHED: &str = "relay.messages.published";
    pub const METRIC_MESSAGES_RECEIVED: &str = "relay.messages.received";
    pub const METRIC_MESSAGES_FAILED: &str = "relay.messages.failed";
    pub const METRIC_MESSAGE_PUBLISH_DURATION: &str = "relay.message.publish.duration";
    pub const METRIC_MESSAGE_PROCESS_DURATION: &str = "relay.message.process.duration";
    pub const METRIC_MESSAGE_PAYLOAD_SIZE: &str = "relay.message.payload.size";
    pub const METRIC_CIRCUIT_BREAKER_STATE: &str = "relay.circuit_breaker.state";
    pub const METRIC_CONNECTIONS_ACTIVE: &str = "relay.connections.active";
    pub const METRIC_QUEUE_SIZE: &str = "relay.queue.size";
}

static GLOBAL_TRACER: once_cell::sync::Lazy<opentelemetry::global::BoxedTracer> =
    once_cell::sync::Lazy::new(|| {
        opentelemetry::global::tracer(names::INSTRUMENTATION_NAME)
    });

static GLOBAL_METER: once_cell::sync::Lazy<opentelemetry::metrics::Meter> =
    once_cell::sync::Lazy::new(|| opentelemetry::global::meter(names::INSTRUMENTATION_NAME));

/// The process-wide tracer instances should use for broker spans.
///
/// Initialized once on first use; the underlying `opentelemetry::global`
/// tracer provider can still be swapped by the embedding application before
/// this is first called.
pub fn tracer() -> &'static opentelemetry::global::BoxedTracer {
    &GLOBAL_TRACER
}

/// The process-wide meter instances should use for broker metrics.
pub fn meter() -> &'static opentelemetry::metrics::Meter {
    &GLOBAL_METER
}

/// The broker's required metric instruments (§6), built once against the
/// process-wide [`meter()`]. `relay.circuit_breaker.state`,
/// `relay.connections.active`, and `relay.queue.size` are modeled as
/// `UpDownCounter`s rather than true gauges: they're updated imperatively
/// (add on acquire, subtract on release) at the few call sites that change
/// them, which is simpler than wiring an observable callback for values the
/// broker already tracks in memory.
pub struct BrokerMetrics {
    pub messages_published: opentelemetry::metrics::Counter<u64>,
    pub messages_received: opentelemetry::metrics::Counter<u64>,
    pub messages_failed: opentelemetry::metrics::Counter<u64>,
    pub publish_duration: opentelemetry::metrics::Histogram<f64>,
    pub process_duration: opentelemetry::metrics::Histogram<f64>,
    pub payload_size: opentelemetry::metrics::Histogram<u64>,
    pub circuit_breaker_state: opentelemetry::metrics::UpDownCounter<i64>,
    pub connections_active: opentelemetry::metrics::UpDownCounter<i64>,
    pub queue_size: opentelemetry::metrics::UpDownCounter<i64>,
}

static BROKER_METRICS: once_cell::sync::Lazy<BrokerMetrics> = once_cell::sync::Lazy::new(|| {
    let meter = meter();
    BrokerMetrics {
        messages_published: meter.u64_counter(names::METRIC_MESSAGES_PUBLISHED).build(),
        messages_received: meter.u64_counter(names::METRIC_MESSAGES_RECEIVED).build(),
        messages_failed: meter.u64_counter(names::METRIC_MESSAGES_FAILED).build(),
        publish_duration: meter.f64_histogram(names::METRIC_MESSAGE_PUBLISH_DURATION).build(),
        process_duration: meter.f64_histogram(names::METRIC_MESSAGE_PROCESS_DURATION).build(),
        payload_size: meter.u64_histogram(names::METRIC_MESSAGE_PAYLOAD_SIZE).build(),
        circuit_breaker_state: meter.i64_up_down_counter(names::METRIC_CIRCUIT_BREAKER_STATE).build(),
        connections_active: meter.i64_up_down_counter(names::METRIC_CONNECTIONS_ACTIVE).build(),
        queue_size: meter.i64_up_down_counter(names::METRIC_QUEUE_SIZE).build(),
    }
});

/// The process-wide broker metric instruments. Safe to call repeatedly from
/// any task; construction happens once.
pub fn broker_metrics() -> &'static BrokerMetrics {
    &BROKER_METRICS
}

/// A telemetry sink that consumes policy events.
///
/// This is a type alias for a `tower::Service` that processes `PolicyEvent`s.
/// Sinks can be composed using standard tower combinators, and multiple sinks
/// can be combined to create complex telemetry pipelines.
///
/// # Implementing a Custom Sink
///
/// ```rust
/// use relay_broker::telemetry::{TelemetrySink, PolicyEvent};
/// use tower::Service;
/// use std::task::{Context, Poll};
/// use std::pin::Pin;
/// use std::future::Future;
///
/// #[derive(Clone)]
/// struct MySink;
///
/// impl Service<PolicyEvent> for MySink {
///     type Response = ();
///     type Error = std::convert::Infallible;
///     type Future = Pin<Box<dyn Future<Output = Result<(), Self::Error>> + Send>>;
///
///     fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
///         Poll::Ready(Ok(()))
///     }
///
///     fn call(&mut self, event: PolicyEvent) -> Self::Future {
///         println!("Received event: {}", event);
///         Box::pin(async { Ok(()) })
///     }
/// }
/// ```
pub trait TelemetrySink:
    tower::Service<PolicyEvent, Response = (), Error = Self::SinkError> + Clone + Send + 'static
{
    /// The error type for this sink.
    type SinkError: std::error::Error + Send + 'static;
}

/// Best-effort emit helper that honors `poll_ready` and swallows errors.
///
/// We keep telemetry non-blocking for policy hot paths: if a sink is not ready
/// or returns an error, we simply drop the event.
pub async fn emit_best_effort<S>(sink: S, event: PolicyEvent)
where
    S: tower::Service<PolicyEvent, Response = ()> + Send + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    use tower::ServiceExt;

    if let Ok(mut ready_sink) = sink.ready_oneshot().await {
        let _ = ready_sink.call(event).await;
    }
}

/// Policy events emitted during execution.
///
/// All resilience policies emit structured events that describe their behavior.
/// These events can be collected, aggregated, and used for observability,
/// monitoring, or autonomous control.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyEvent {
    /// Retry policy events
    Retry(RetryEvent),
    /// Circuit breaker events
    CircuitBreaker(CircuitBreakerEvent),
    /// Bulkhead events
    Bulkhead(BulkheadEvent),
    /// Timeout events
    Timeout(TimeoutEvent),
    /// Request outcome events (emitted by all policies)
    Request(RequestOutcome),
    /// Broker-level events (publish/receive/process lifecycle, saga lifecycle)
    Broker(BrokerEvent),
}

/// Events emitted by the broker skeleton's publish/subscribe pipeline and the
/// saga orchestrator. Named after the `names` module's event-name constants.
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    MessagePublished { message_type: String, compressed: bool, duration: Duration },
    MessageReceived { message_type: String },
    MessageProcessed { message_type: String, duration: Duration },
    CircuitBreakerOpened { destination: String, failure_count: usize },
    SagaStarted { saga_id: String },
    SagaCompleted { saga_id: String, steps_executed: usize, duration: Duration },
    SagaFailed { saga_id: String, failed_step: String, error: String, steps_executed_before_failure: usize },
    SagaCompensated { saga_id: String, compensation_succeeded: bool, steps_compensated: usize, original_error: String },
}

/// Events emitted by retry policies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryEvent {
    /// A retry attempt is about to be made.
    ///
    /// Emitted before sleeping and retrying a failed request.
    Attempt {
        /// The attempt number (1-indexed)
        attempt: usize,
        /// The backoff delay before this retry
        delay: Duration,
    },
    /// All retry attempts have been exhausted.
    ///
    /// Emitted when the maximum number of retries is reached
    /// and the request still fails.
    Exhausted {
        /// Total number of attempts made
        total_attempts: usize,
        /// Total time spent retrying
        total_duration: Duration,
    },
}

/// Events emitted by circuit breaker policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerEvent {
    /// Circuit transitioned to open state.
    ///
    /// Subsequent requests will be rejected immediately without
    /// being forwarded to the inner service.
    Opened {
        /// Number of consecutive failures that triggered the open
        failure_count: usize,
    },
    /// Circuit transitioned to half-open state.
    ///
    /// A limited number of test requests will be allowed through
    /// to determine if the inner service has recovered.
    HalfOpen,
    /// Circuit transitioned to closed state.
    ///
    /// Normal operation resumes - all requests are forwarded.
    Closed,
}

/// Events emitted by bulkhead policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkheadEvent {
    /// A request successfully acquired a bulkhead permit.
    ///
    /// The request will proceed to the inner service.
    Acquired {
        /// Current number of active requests
        active_count: usize,
        /// Maximum concurrency limit
        max_concurrency: usize,
    },
    /// A request was rejected due to bulkhead saturation.
    ///
    /// All available permits are in use.
    Rejected {
        /// Current number of active requests
        active_count: usize,
        /// Maximum concurrency limit
        max_concurrency: usize,
    },
}

/// Events emitted by timeout policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutEvent {
    /// A request exceeded the timeout duration.
    ///
    /// The request was cancelled and an error returned.
    Occurred {
        /// The timeout duration that was exceeded
        timeout: Duration,
    },
}

/// Request outcome events emitted by all policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Request completed successfully.
    Success {
        /// Time taken to complete the request
        duration: Duration,
    },
    /// Request failed with an error.
    Failure {
        /// Time taken before failure
        duration: Duration,
    },
}

impl fmt::Display for PolicyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyEvent::Retry(event) => write!(f, "Retry::{}", event),
            PolicyEvent::CircuitBreaker(event) => write!(f, "CircuitBreaker::{}", event),
            PolicyEvent::Bulkhead(event) => write!(f, "Bulkhead::{}", event),
            PolicyEvent::Timeout(event) => write!(f, "Timeout::{}", event),
            PolicyEvent::Request(event) => write!(f, "Request::{}", event),
            PolicyEvent::Broker(event) => write!(f, "Broker::{}", event),
        }
    }
}

impl fmt::Display for BrokerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerEvent::MessagePublished { message_type, compressed, duration } => write!(
                f,
                "MessagePublished(type={}, compressed={}, duration={:?})",
                message_type, compressed, duration
            ),
            BrokerEvent::MessageReceived { message_type } => {
                write!(f, "MessageReceived(type={})", message_type)
            }
            BrokerEvent::MessageProcessed { message_type, duration } => {
                write!(f, "MessageProcessed(type={}, duration={:?})", message_type, duration)
            }
            BrokerEvent::CircuitBreakerOpened { destination, failure_count } => write!(
                f,
                "CircuitBreakerOpened(destination={}, failures={})",
                destination, failure_count
            ),
            BrokerEvent::SagaStarted { saga_id } => write!(f, "SagaStarted(id={})", saga_id),
            BrokerEvent::SagaCompleted { saga_id, steps_executed, duration } => write!(
                f,
                "SagaCompleted(id={}, steps={}, duration={:?})",
                saga_id, steps_executed, duration
            ),
            BrokerEvent::SagaFailed { saga_id, failed_step, error, steps_executed_before_failure } => {
                write!(
                    f,
                    "SagaFailed(id={}, step={}, error={}, steps_before_failure={})",
                    saga_id, failed_step, error, steps_executed_before_failure
                )
            }
            BrokerEvent::SagaCompensated {
                saga_id,
                compensation_succeeded,
                steps_compensated,
                original_error,
            } => write!(
                f,
                "SagaCompensated(id={}, succeeded={}, steps={}, original_error={})",
                saga_id, compensation_succeeded, steps_compensated, original_error
            ),
        }
    }
}

impl fmt::Display for RetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryEvent::Attempt { attempt, delay } => {
                write!(f, "Attempt(#{}, delay={:?})", attempt, delay)
            }
            RetryEvent::Exhausted { total_attempts, total_duration } => {
                write!(f, "Exhausted(attempts={}, duration={:?})", total_attempts, total_duration)
            }
        }
    }
}

impl fmt::Display for CircuitBreakerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitBreakerEvent::Opened { failure_count } => {
                write!(f, "Opened(failures={})", failure_count)
            }
            CircuitBreakerEvent::HalfOpen => write!(f, "HalfOpen"),
            CircuitBreakerEvent::Closed => write!(f, "Closed"),
        }
    }
}

impl fmt::Display for BulkheadEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BulkheadEvent::Acquired { active_count, max_concurrency } => {
                write!(f, "Acquired({}/{})", active_count, max_concurrency)
            }
            BulkheadEvent::Rejected { active_count, max_concurrency } => {
                write!(f, "Rejected({}/{})", active_count, max_concurrency)
            }
        }
    }
}

impl fmt::Display for TimeoutEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutEvent::Occurred { timeout } => write!(f, "Occurred(timeout={:?})", timeout),
        }
    }
}

impl fmt::Display for RequestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestOutcome::Success { duration } => write!(f, "Success(duration={:?})", duration),
            RequestOutcome::Failure { duration } => write!(f, "Failure(duration={:?})", duration),
        }
    }
}

// ============================================================================
// Built-in Telemetry Sinks
// ============================================================================

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tower::Service;

/// A no-op telemetry sink that discards all events.
///
/// Useful for testing or when telemetry is disabled.
///
/// # Example
///
/// ```rust
/// use relay_broker::telemetry::{NullSink, PolicyEvent, RetryEvent};
/// use tower::Service;
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() {
/// let mut sink = NullSink;
/// let event = PolicyEvent::Retry(RetryEvent::Attempt {
///     attempt: 1,
///     delay: Duration::from_millis(100),
/// });
///
/// // Event is silently discarded
/// let _ = sink.call(event).await;
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<PolicyEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: PolicyEvent) -> Self::Future {
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for NullSink {
    type SinkError = Infallible;
}

/// A telemetry sink that logs events using the `tracing` crate.
///
/// Events are logged at INFO level with structured fields.
///
/// # Example
///
/// ```rust
/// use relay_broker::telemetry::{LogSink, PolicyEvent, CircuitBreakerEvent};
/// use tower::Service;
///
/// # #[tokio::main]
/// # async fn main() {
/// let mut sink = LogSink;
/// let event = PolicyEvent::CircuitBreaker(CircuitBreakerEvent::Opened {
///     failure_count: 5,
/// });
///
/// // Logs: "policy_event{event=CircuitBreaker::Opened(failures=5)}"
/// let _ = sink.call(event).await;
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<PolicyEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: PolicyEvent) -> Self::Future {
        tracing::info!(event = %event, "policy_event");
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for LogSink {
    type SinkError = Infallible;
}

/// A telemetry sink that stores events in memory.
///
/// Useful for testing and debugging. Events are stored in a `Vec` protected
/// by a `Mutex`.
///
/// # Example
///
/// ```rust
/// use relay_broker::telemetry::{MemorySink, PolicyEvent, TimeoutEvent};
/// use tower::Service;
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() {
/// let mut sink = MemorySink::new();
/// let event = PolicyEvent::Timeout(TimeoutEvent::Occurred {
///     timeout: Duration::from_secs(1),
/// });
///
/// sink.call(event.clone()).await.unwrap();
///
/// let events = sink.events();
/// assert_eq!(events.len(), 1);
/// assert_eq!(events[0], event);
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<PolicyEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    /// Creates a bounded memory sink (default cap: 10,000).
    /// Oldest events are evicted when capacity is exceeded.
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    /// Creates a bounded memory sink with explicit capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Creates an unbounded memory sink. Dangerous in production.
    pub fn unbounded() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            capacity: usize::MAX,
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns a snapshot of all events received so far.
    pub fn events(&self) -> Vec<PolicyEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Clears all stored events.
    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    /// Returns the number of events stored.
    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    /// Returns true if no events are stored.
    pub fn is_empty(&self) -> bool {
        self.events.lock().unwrap().is_empty()
    }

    /// Returns the configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of evicted events.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<PolicyEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: PolicyEvent) -> Self::Future {
        let mut guard = self.events.lock().unwrap();
        if guard.len() >= self.capacity {
            guard.remove(0);
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        guard.push(event);
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for MemorySink {
    type SinkError = Infallible;
}

/// A streaming telemetry sink that broadcasts events to multiple subscribers.
///
/// Uses `tokio::sync::broadcast` to publish events to all active receivers.
/// Receivers that fall behind will miss events (the channel has bounded capacity).
///
/// # Example
///
/// ```rust
/// use relay_broker::telemetry::{StreamingSink, PolicyEvent, RetryEvent};
/// use tower::Service;
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() {
/// let sink = StreamingSink::new(100); // 100 event buffer
/// let mut receiver = sink.subscribe();
///
/// let mut sink_clone = sink.clone();
/// let event = PolicyEvent::Retry(RetryEvent::Attempt {
///     attempt: 1,
///     delay: Duration::from_millis(100),
/// });
///
/// // Send event through sink
/// sink_clone.call(event.clone()).await.unwrap();
///
/// // Receive from subscriber
/// let received = receiver.recv().await.unwrap();
/// assert_eq!(received, event);
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct StreamingSink {
    sender: Arc<tokio::sync::broadcast::Sender<PolicyEvent>>,
    dropped: Arc<AtomicU64>,
    last_drop_ns: Arc<AtomicU64>,
}

impl StreamingSink {
    /// Creates a new streaming sink with the specified buffer capacity.
    ///
    /// When the buffer is full, the oldest events will be dropped for slow receivers.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
            dropped: Arc::new(AtomicU64::new(0)),
            last_drop_ns: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Subscribe to receive events from this sink.
    ///
    /// Returns a receiver that will get all future events sent through this sink.
    /// Multiple receivers can subscribe simultaneously.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PolicyEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Returns number of events dropped due to slow subscribers.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Timestamp of last drop, if any.
    pub fn last_drop(&self) -> Option<SystemTime> {
        match self.last_drop_ns.load(Ordering::Relaxed) {
            0 => None,
            ns => UNIX_EPOCH.checked_add(Duration::from_nanos(ns)),
        }
    }
}

impl Service<PolicyEvent> for StreamingSink {
    type Response = ();
    type Error = Infallible;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: PolicyEvent) -> Self::Future {
        // Send is best-effort - ignore if no receivers
        if let Err(_e) = self.sender.send(event) {
            // Receiver lagged or none connected
            self.dropped.fetch_add(1, Ordering::Relaxed);
            self.last_drop_ns.store(
                SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as u64,
                Ordering::Relaxed,
            );
        }
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for StreamingSink {
    type SinkError = Infallible;
}

// ============================================================================
// Non-blocking sink wrapper
// ============================================================================

/// Offloads telemetry emission to a bounded channel and worker task.
/// Keeps policy hot paths from awaiting slow sinks.
#[derive(Clone)]
pub struct NonBlockingSink<S> {
    tx: tokio::sync::mpsc::Sender<PolicyEvent>,
    dropped: Arc<AtomicU64>,
    _sink: Arc<tokio::sync::Mutex<S>>, // keep sink alive
}

impl<S> NonBlockingSink<S>
where
    S: tower::Service<PolicyEvent, Response = ()> + Send + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    /// Create a new non-blocking wrapper with bounded queue and background worker.
    pub fn with_capacity(sink: S, capacity: usize) -> Self {
        let (tx, mut rx) = tokio::sync::mpsc::channel(capacity);
        let dropped = Arc::new(AtomicU64::new(0));
        let dropped_clone = dropped.clone();
        let sink_arc = Arc::new(tokio::sync::Mutex::new(sink));
        let sink_worker = sink_arc.clone();

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                use tower::ServiceExt;
                let mut guard = sink_worker.lock().await;
                if let Ok(ready) = guard.ready().await {
                    let _ = ready.call(event).await;
                }
            }
        });

        Self { tx, dropped: dropped_clone, _sink: sink_arc }
    }

    /// How many events were dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<S> tower::Service<PolicyEvent> for NonBlockingSink<S>
where
    S: tower::Service<PolicyEvent, Response = ()> + Send + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = ();
    type Error = Infallible;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: PolicyEvent) -> Self::Future {
        if self.tx.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        Box::pin(async { Ok(()) })
    }
}

impl<S> TelemetrySink for NonBlockingSink<S>
where
    S: tower::Service<PolicyEvent, Response = ()> + Send + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    type SinkError = Infallible;
}

// ============================================================================
// Telemetry Sink Composition
// ============================================================================

/// Error type for composed telemetry sinks.
#[derive(Debug)]
pub struct ComposedSinkError(Box<dyn std::error::Error + Send + Sync>);

impl std::fmt::Display for ComposedSinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "telemetry sink error: {}", self.0)
    }
}

impl std::error::Error for ComposedSinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.0)
    }
}

/// Multicasts events to two sinks in parallel (operator `+`).
///
/// Both sinks receive all events. If either sink fails, the error is propagated.
///
/// # Example
///
/// ```rust
/// use relay_broker::telemetry::{LogSink, MemorySink, MulticastSink};
/// use tower::Service;
///
/// let log = LogSink;
/// let memory = MemorySink::new();
/// let combined = MulticastSink::new(log, memory);
/// // Both sinks will receive all events
/// ```
#[derive(Clone)]
pub struct MulticastSink<A, B> {
    sink_a: A,
    sink_b: B,
}

impl<A, B> MulticastSink<A, B> {
    /// Create a new multicast sink that sends events to both `sink_a` and `sink_b`.
    pub fn new(sink_a: A, sink_b: B) -> Self {
        Self { sink_a, sink_b }
    }
}

impl<A, B> Service<PolicyEvent> for MulticastSink<A, B>
where
    A: tower::Service<PolicyEvent, Response = ()> + Clone + Send + 'static,
    A::Error: std::error::Error + Send + Sync + 'static,
    A::Future: Send + 'static,
    B: tower::Service<PolicyEvent, Response = ()> + Clone + Send + 'static,
    B::Error: std::error::Error + Send + Sync + 'static,
    B::Future: Send + 'static,
{
    type Response = ();
    type Error = ComposedSinkError;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: PolicyEvent) -> Self::Future {
        let mut sink_a = self.sink_a.clone();
        let mut sink_b = self.sink_b.clone();
        let event_clone = event.clone();

        Box::pin(async move {
            // Call both sinks concurrently
            let (res_a, res_b) = tokio::join!(sink_a.call(event), sink_b.call(event_clone));

            res_a.map_err(|e| ComposedSinkError(Box::new(e)))?;
            res_b.map_err(|e| ComposedSinkError(Box::new(e)))?;

            Ok(())
        })
    }
}

impl<A, B> TelemetrySink for MulticastSink<A, B>
where
    A: tower::Service<PolicyEvent, Response = ()> + Clone + Send + 'static,
    A::Error: std::error::Error + Send + Sync + 'static,
    A::Future: Send + 'static,
    B: tower::Service<PolicyEvent, Response = ()> + Clone + Send + 'static,
    B::Error: std::error::Error + Send + Sync + 'static,
    B::Future: Send + 'static,
{
    type SinkError = ComposedSinkError;
}

/// Sends events to primary sink, falling back to secondary on error (operator `|`).
///
/// # Example
///
/// ```rust
/// use relay_broker::telemetry::{LogSink, MemorySink, FallbackSink};
/// use tower::Service;
///
/// let primary = LogSink;
/// let fallback = MemorySink::new();
/// let combined = FallbackSink::new(primary, fallback);
/// // Try primary, use fallback if it fails
/// ```
#[derive(Clone)]
pub struct FallbackSink<A, B> {
    primary: A,
    fallback: B,
}

impl<A, B> FallbackSink<A, B> {
    /// Create a new fallback sink that tries `primary` first, then `fallback` on error.
    pub fn new(primary: A, fallback: B) -> Self {
        Self { primary, fallback }
    }
}

impl<A, B> Service<PolicyEvent> for FallbackSink<A, B>
where
    A: tower::Service<PolicyEvent, Response = ()> + Clone + Send + 'static,
    A::Error: std::error::Error + Send + Sync + 'static,
    A::Future: Send + 'static,
    B: tower::Service<PolicyEvent, Response = ()> + Clone + Send + 'static,
    B::Error: std::error::Error + Send + Sync + 'static,
    B::Future: Send + 'static,
{
    type Response = ();
    type Error = ComposedSinkError;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: PolicyEvent) -> Self::Future {
        let mut primary = self.primary.clone();
        let mut fallback = self.fallback.clone();
        let event_clone = event.clone();

        Box::pin(async move {
            match primary.call(event).await {
                Ok(()) => Ok(()),
                Err(_) => {
                    // Primary failed, try fallback
                    fallback.call(event_clone).await.map_err(|e| ComposedSinkError(Box::new(e)))
                }
            }
        })
    }
}

impl<A, B> TelemetrySink for FallbackSink<A, B>
where
    A: tower::Service<PolicyEvent, Response = ()> + Clone + Send + 'static,
    A::Error: std::error::Error + Send + Sync + 'static,
    A::Future: Send + 'static,
    B: tower::Service<PolicyEvent, Response = ()> + Clone + Send + 'static,
    B::Error: std::error::Error + Send + Sync + 'static,
    B::Future: Send + 'static,
{
    type SinkError = ComposedSinkError;
}
