#![forbid(unsafe_code)]

//! # Relay Broker
//!
//! A multi-backend message broker abstraction: one publish/subscribe API over
//! AMQP, a distributed log, a cloud queue, a cloud service bus, lightweight
//! pub/sub, and a stream-in-store backend, all sharing one resilience
//! pipeline (retry, circuit breaker, bulkhead, timeout), rate limiting,
//! compression, and saga orchestration.
//!
//! ## Features
//!
//! - **Resilience pipeline** composing retry/circuit-breaker/bulkhead/timeout
//!   policies around every backend call
//! - **Rate limiting** via token-bucket or sliding-window, global or per-tenant
//! - **Compression** (deflate/gzip/lz4) with a size threshold and per-type skip list
//! - **Saga orchestration** with reverse-order compensation on failure
//! - **OpenTelemetry-shaped telemetry**: structured tracing spans, metrics, and
//!   a composable `TelemetrySink` for resilience-policy events
//! - **Pluggable backend adapters** living in their own workspace crates
//!
//! ## Quick start
//!
//! ```rust
//! use relay_broker::backend::{
//!     BackendAdapter, DeliveryContext, OutboundEnvelope, SubscribeHandler, SubscriptionOptions,
//! };
//! use relay_broker::broker::Broker;
//! use relay_broker::config::{BrokerOptions, BrokerType, LightweightOptions};
//! use relay_broker::error::BrokerError;
//! use async_trait::async_trait;
//! use serde::Serialize;
//! use tokio_util::sync::CancellationToken;
//!
//! struct NoopBackend;
//!
//! #[async_trait]
//! impl BackendAdapter for NoopBackend {
//!     async fn start_internal(&self) -> Result<(), BrokerError> { Ok(()) }
//!     async fn stop_internal(&self) -> Result<(), BrokerError> { Ok(()) }
//!     async fn dispose_internal(&self) -> Result<(), BrokerError> { Ok(()) }
//!     async fn publish_internal(
//!         &self,
//!         _envelope: OutboundEnvelope,
//!         _cancellation: CancellationToken,
//!     ) -> Result<(), BrokerError> {
//!         Ok(())
//!     }
//!     async fn subscribe_internal(
//!         &self,
//!         _options: SubscriptionOptions,
//!         _handler: SubscribeHandler,
//!         _cancellation: CancellationToken,
//!     ) -> Result<(), BrokerError> {
//!         Ok(())
//!     }
//! }
//!
//! #[derive(Serialize)]
//! struct OrderCreated {
//!     order_id: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), BrokerError> {
//!     let mut options = BrokerOptions::default();
//!     options.broker_type = BrokerType::Lightweight;
//!     options.backend.lightweight = Some(LightweightOptions {
//!         servers: vec!["nats://localhost:4222".to_string()],
//!         ..Default::default()
//!     });
//!
//!     let broker = Broker::new(options, NoopBackend)?;
//!     broker.start().await?;
//!     broker
//!         .publish(
//!             &OrderCreated { order_id: "1".to_string() },
//!             "OrderCreated",
//!             None,
//!             CancellationToken::new(),
//!         )
//!         .await?;
//!     broker.dispose().await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod backoff;
pub mod broker;
pub mod bulkhead;
pub mod circuit_breaker;
pub mod clock;
pub mod compression;
pub mod config;
pub mod error;
pub mod jitter;
pub mod rate_limit;
pub mod retry;
pub mod saga;
pub mod sleeper;
pub mod telemetry;
pub mod timeout;

pub use backoff::Backoff;
pub use broker::{Broker, BrokerState, Validator};
pub use bulkhead::BulkheadPolicy;
pub use circuit_breaker::{CircuitBreakerConfig, CircuitBreakerPolicy, CircuitState};
pub use clock::{Clock, MonotonicClock};
pub use config::BrokerOptions;
pub use error::BrokerError;
pub use jitter::Jitter;
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use retry::{RetryPolicy, RetryPolicyBuilder};
pub use saga::{Saga, SagaOutcome, SagaStatus, SagaStep};
pub use timeout::{TimeoutPolicy, MAX_TIMEOUT};

pub mod prelude;
