//! The backend adapter contract (C6): the seam the broker skeleton calls
//! through, and the wire-level types that cross it.
//!
//! Concrete adapters (AMQP, Kafka, SQS/SNS, Service Bus, NATS, EventStore)
//! live in their own workspace crates and implement [`BackendAdapter`]; this
//! module only defines the contract and the envelope/header/subscription
//! shapes every adapter shares. No transport-specific wire details belong
//! here.

use crate::error::BrokerError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A header value. Headers carry routing metadata (routing key, message
/// group, deduplication id, compression algorithm tag, correlation id,
/// timestamps) alongside the envelope body; restricting them to primitives
/// keeps every adapter's native-metadata translation mechanical.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::Str(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::Str(value)
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        HeaderValue::Int(value)
    }
}

impl From<bool> for HeaderValue {
    fn from(value: bool) -> Self {
        HeaderValue::Bool(value)
    }
}

pub type Headers = HashMap<String, HeaderValue>;

/// A serialized (and possibly compressed) message ready to cross the backend
/// boundary. Built by the publish pipeline (steps 1-4 of §4.5) before the
/// rate limiter and circuit breaker are consulted.
#[derive(Debug, Clone)]
pub struct OutboundEnvelope {
    pub routing_key: Option<String>,
    pub bytes: Vec<u8>,
    pub headers: Headers,
    /// FIFO queue adapters only: set when the target queue is declared FIFO.
    /// MUST be omitted for non-FIFO queues even if populated here.
    pub message_group_id: Option<String>,
    /// FIFO queue adapters only; see [`OutboundEnvelope::message_group_id`].
    pub message_deduplication_id: Option<String>,
}

impl OutboundEnvelope {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            routing_key: None,
            bytes,
            headers: Headers::new(),
            message_group_id: None,
            message_deduplication_id: None,
        }
    }
}

/// Delivery-time metadata handed to a subscriber alongside the raw bytes.
#[derive(Debug, Clone)]
pub struct DeliveryContext {
    pub headers: Headers,
    pub routing_key: Option<String>,
    pub redelivered: bool,
}

impl DeliveryContext {
    pub fn new(headers: Headers, routing_key: Option<String>) -> Self {
        Self { headers, routing_key, redelivered: false }
    }
}

/// Recognized subscription-registration fields (§3's "Subscription record").
/// Adapters use what applies to their transport and ignore the rest; the
/// broker skeleton never interprets these itself beyond passing them through.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionOptions {
    pub queue_or_stream_name: Option<String>,
    pub routing_key_or_topic_pattern: Option<String>,
    pub consumer_group: Option<String>,
    pub prefetch_count: Option<u16>,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub auto_ack: bool,
}

/// A handler registered by `subscribe`, invoked per delivered message with
/// the raw bytes (decompression/deserialization is the caller's concern
/// above this layer — adapters never inspect the payload), the delivery
/// context, and a cancellation token scoped to this single delivery.
pub type SubscribeHandler =
    Arc<dyn Fn(Vec<u8>, DeliveryContext, CancellationToken) -> BoxFuture<'static, Result<(), BrokerError>> + Send + Sync>;

/// The seam every concrete backend crate implements. The broker skeleton
/// calls these five methods directly; `publish_internal` additionally sits
/// inside the bulkhead/timeout/retry/circuit-breaker composition described
/// in §4.5 step 7, so adapters should treat a single call as one attempt, not
/// as something that needs its own internal retry loop.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    async fn start_internal(&self) -> Result<(), BrokerError>;

    async fn stop_internal(&self) -> Result<(), BrokerError>;

    async fn dispose_internal(&self) -> Result<(), BrokerError>;

    async fn publish_internal(
        &self,
        envelope: OutboundEnvelope,
        cancellation: CancellationToken,
    ) -> Result<(), BrokerError>;

    async fn subscribe_internal(
        &self,
        options: SubscriptionOptions,
        handler: SubscribeHandler,
        cancellation: CancellationToken,
    ) -> Result<(), BrokerError>;
}

/// Resolves a routing key from an explicit override or, when absent, from
/// `pattern` via [`crate::config::resolve_routing_key`].
pub fn effective_routing_key(
    explicit: Option<&str>,
    pattern: &str,
    simple_name: &str,
    full_name: &str,
) -> String {
    match explicit {
        Some(key) if !key.trim().is_empty() => key.to_string(),
        _ => crate::config::resolve_routing_key(pattern, simple_name, full_name),
    }
}

/// Applies FIFO group/deduplication semantics: populates both fields when
/// `is_fifo`, strips both otherwise (even if the caller had set them),
/// per §4.6's "MUST be omitted even if set in options".
pub fn apply_fifo_semantics(
    envelope: &mut OutboundEnvelope,
    is_fifo: bool,
    default_group_id: Option<&str>,
    computed_dedup_id: impl FnOnce() -> String,
) {
    if !is_fifo {
        envelope.message_group_id = None;
        envelope.message_deduplication_id = None;
        return;
    }

    if envelope.message_group_id.is_none() {
        envelope.message_group_id = default_group_id.map(|s| s.to_string());
    }
    if envelope.message_deduplication_id.is_none() {
        envelope.message_deduplication_id = Some(computed_dedup_id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_routing_key_prefers_explicit_override() {
        let key = effective_routing_key(Some("orders.created"), "{MessageType}", "OrderCreated", "full");
        assert_eq!(key, "orders.created");
    }

    #[test]
    fn effective_routing_key_falls_back_to_pattern() {
        let key = effective_routing_key(None, "{MessageType}", "OrderCreated", "full");
        assert_eq!(key, "ordercreated");
    }

    #[test]
    fn effective_routing_key_treats_blank_override_as_absent() {
        let key = effective_routing_key(Some("   "), "{MessageType}", "OrderCreated", "full");
        assert_eq!(key, "ordercreated");
    }

    #[test]
    fn fifo_semantics_strip_fields_for_non_fifo_queue() {
        let mut envelope = OutboundEnvelope::new(vec![]);
        envelope.message_group_id = Some("group-1".into());
        envelope.message_deduplication_id = Some("dedup-1".into());
        apply_fifo_semantics(&mut envelope, false, Some("group-1"), || "dedup-2".into());
        assert!(envelope.message_group_id.is_none());
        assert!(envelope.message_deduplication_id.is_none());
    }

    #[test]
    fn fifo_semantics_fill_defaults_when_absent() {
        let mut envelope = OutboundEnvelope::new(vec![]);
        apply_fifo_semantics(&mut envelope, true, Some("group-1"), || "dedup-2".into());
        assert_eq!(envelope.message_group_id.as_deref(), Some("group-1"));
        assert_eq!(envelope.message_deduplication_id.as_deref(), Some("dedup-2"));
    }

    #[test]
    fn fifo_semantics_preserve_explicit_override() {
        let mut envelope = OutboundEnvelope::new(vec![]);
        envelope.message_group_id = Some("explicit-group".into());
        apply_fifo_semantics(&mut envelope, true, Some("default-group"), || "dedup".into());
        assert_eq!(envelope.message_group_id.as_deref(), Some("explicit-group"));
    }
}
