//! Unified configuration surface for the broker skeleton and its backend
//! adapters.
//!
//! `BrokerOptions` and every nested bag derive `serde::{Serialize,
//! Deserialize}` behind the `config-serde` feature so a deployment can load
//! them from JSON/YAML/env, while still being buildable purely in code for
//! tests. Validation happens once, at registration time, via [`BrokerOptions::validate`];
//! it never panics and never guesses a correction, it just names the
//! offending field.

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::compression::Algorithm;
use crate::error::BrokerError;
use crate::rate_limit::RateLimitConfig;
use std::collections::HashMap;
use std::collections::HashSet;
use std::time::Duration;

#[cfg_attr(feature = "config-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerType {
    Amqp,
    DistributedLog,
    CloudQueue,
    CloudServiceBus,
    Lightweight,
    StreamInStore,
}

/// Compression option bag, consulted by the publish pipeline's step 4.
#[cfg_attr(feature = "config-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    pub enabled: bool,
    pub algorithm: Algorithm,
    /// `0..=9`; forwarded to the codec as-is.
    pub level: u8,
    /// Payloads smaller than this are never compressed.
    pub minimum_size: usize,
    /// Message types that skip compression even when otherwise eligible.
    pub skip_types: HashSet<String>,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            algorithm: Algorithm::Gzip,
            level: 6,
            minimum_size: 1024,
            skip_types: HashSet::new(),
        }
    }
}

/// Plain-data retry settings. Converted into a runtime [`crate::retry::RetryPolicy`]
/// by the broker skeleton at construction time (the runtime type holds a
/// `Sleeper`/`RetryClassifier`, which aren't serializable).
#[cfg_attr(feature = "config-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct RetryPolicyConfig {
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub use_exponential_backoff: bool,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            use_exponential_backoff: true,
        }
    }
}

impl RetryPolicyConfig {
    pub fn to_backoff(&self) -> crate::backoff::Backoff {
        if self.use_exponential_backoff {
            crate::backoff::Backoff::exponential(self.initial_delay, self.backoff_multiplier)
                .with_max(self.max_delay)
        } else {
            crate::backoff::Backoff::linear(self.initial_delay, self.backoff_multiplier)
                .with_max(self.max_delay)
        }
    }
}

#[cfg_attr(feature = "config-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Default)]
pub struct AmqpOptions {
    pub host_name: String,
    pub port: u16,
    pub user_name: String,
    pub password: String,
    pub virtual_host: String,
    pub exchange_type: String,
    pub prefetch_count: u16,
}

impl AmqpOptions {
    fn validate(&self) -> Result<(), BrokerError> {
        if self.host_name.trim().is_empty() {
            return Err(BrokerError::invalid_argument("HostName"));
        }
        if self.port == 0 {
            return Err(BrokerError::invalid_argument("Port"));
        }
        if self.prefetch_count == 0 {
            return Err(BrokerError::invalid_argument("PrefetchCount"));
        }
        Ok(())
    }
}

#[cfg_attr(feature = "config-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoOffsetReset {
    Earliest,
    Latest,
}

#[cfg_attr(feature = "config-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct DistributedLogOptions {
    pub bootstrap_servers: String,
    pub consumer_group_id: String,
    pub auto_offset_reset: AutoOffsetReset,
    pub enable_auto_commit: bool,
    pub compression_type: String,
}

impl Default for DistributedLogOptions {
    fn default() -> Self {
        Self {
            bootstrap_servers: String::new(),
            consumer_group_id: String::new(),
            auto_offset_reset: AutoOffsetReset::Latest,
            enable_auto_commit: true,
            compression_type: "none".to_string(),
        }
    }
}

impl DistributedLogOptions {
    fn validate(&self) -> Result<(), BrokerError> {
        if self.bootstrap_servers.trim().is_empty() {
            return Err(BrokerError::invalid_argument("BootstrapServers"));
        }
        Ok(())
    }
}

#[cfg_attr(feature = "config-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Default)]
pub struct CloudQueueOptions {
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub default_queue_url: Option<String>,
    pub default_topic_arn: Option<String>,
    pub use_fifo_queue: bool,
    pub message_group_id: Option<String>,
    pub message_deduplication_id: Option<String>,
}

impl CloudQueueOptions {
    fn validate(&self) -> Result<(), BrokerError> {
        if self.region.trim().is_empty() {
            return Err(BrokerError::invalid_argument("Region"));
        }
        Ok(())
    }
}

#[cfg_attr(feature = "config-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceBusEntityType {
    Queue,
    Topic,
}

#[cfg_attr(feature = "config-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct CloudServiceBusOptions {
    pub connection_string: String,
    pub entity_type: ServiceBusEntityType,
    pub default_entity_name: Option<String>,
}

impl Default for CloudServiceBusOptions {
    fn default() -> Self {
        Self {
            connection_string: String::new(),
            entity_type: ServiceBusEntityType::Queue,
            default_entity_name: None,
        }
    }
}

impl CloudServiceBusOptions {
    fn validate(&self) -> Result<(), BrokerError> {
        if self.connection_string.trim().is_empty() {
            return Err(BrokerError::invalid_configuration(
                "Azure Service Bus connection string is required.",
            ));
        }
        Ok(())
    }
}

#[cfg_attr(feature = "config-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Default)]
pub struct LightweightOptions {
    pub servers: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
    pub max_reconnects: Option<u32>,
    pub stream_name: Option<String>,
}

impl LightweightOptions {
    fn validate(&self) -> Result<(), BrokerError> {
        if self.servers.is_empty() {
            return Err(BrokerError::invalid_argument("Servers"));
        }
        Ok(())
    }
}

#[cfg_attr(feature = "config-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Default)]
pub struct StreamInStoreOptions {
    pub connection_string: String,
    pub default_stream_name: String,
    pub consumer_group_name: String,
    pub consumer_name: String,
}

impl StreamInStoreOptions {
    fn validate(&self) -> Result<(), BrokerError> {
        if self.connection_string.trim().is_empty() {
            return Err(BrokerError::invalid_argument("ConnectionString"));
        }
        if self.default_stream_name.trim().is_empty() {
            return Err(BrokerError::invalid_argument("DefaultStreamName"));
        }
        if self.consumer_group_name.trim().is_empty() {
            return Err(BrokerError::invalid_argument("ConsumerGroupName"));
        }
        if self.consumer_name.trim().is_empty() {
            return Err(BrokerError::invalid_argument("ConsumerName"));
        }
        Ok(())
    }
}

/// The backend-specific option bag selected by [`BrokerOptions::broker_type`].
///
/// Exactly one variant matters for a given `broker_type`; the others are
/// ignored. Construction fails with `InvalidConfiguration` naming the backend
/// when the matching bag is `None`.
#[cfg_attr(feature = "config-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Default)]
pub struct BackendOptions {
    pub amqp: Option<AmqpOptions>,
    pub distributed_log: Option<DistributedLogOptions>,
    pub cloud_queue: Option<CloudQueueOptions>,
    pub cloud_service_bus: Option<CloudServiceBusOptions>,
    pub lightweight: Option<LightweightOptions>,
    pub stream_in_store: Option<StreamInStoreOptions>,
}

/// Top-level broker configuration. Validated once via [`BrokerOptions::validate`]
/// before the broker skeleton starts using it.
#[cfg_attr(feature = "config-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct BrokerOptions {
    pub broker_type: BrokerType,
    /// Placeholders: `{MessageType}`, `{MessageFullName}`.
    pub default_routing_key_pattern: String,
    pub compression: CompressionConfig,
    pub retry_policy: RetryPolicyConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub rate_limit: RateLimitConfig,
    pub backend: BackendOptions,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            broker_type: BrokerType::Lightweight,
            default_routing_key_pattern: "{MessageType}".to_string(),
            compression: CompressionConfig::default(),
            retry_policy: RetryPolicyConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            backend: BackendOptions::default(),
        }
    }
}

impl BrokerOptions {
    /// Fails fast with `InvalidConfiguration` naming the backend when the
    /// option bag matching `broker_type` is absent, and with `InvalidArgument`
    /// naming the offending field for anything inside that bag.
    pub fn validate(&self) -> Result<(), BrokerError> {
        match self.broker_type {
            BrokerType::Amqp => match &self.backend.amqp {
                Some(opts) => opts.validate(),
                None => Err(BrokerError::invalid_configuration("AMQP options are required.")),
            },
            BrokerType::DistributedLog => match &self.backend.distributed_log {
                Some(opts) => opts.validate(),
                None => Err(BrokerError::invalid_configuration(
                    "Distributed log options are required.",
                )),
            },
            BrokerType::CloudQueue => match &self.backend.cloud_queue {
                Some(opts) => opts.validate(),
                None => Err(BrokerError::invalid_configuration("AWS SQS/SNS options are required.")),
            },
            BrokerType::CloudServiceBus => match &self.backend.cloud_service_bus {
                Some(opts) => opts.validate(),
                None => {
                    Err(BrokerError::invalid_configuration("Azure Service Bus options are required."))
                }
            },
            BrokerType::Lightweight => match &self.backend.lightweight {
                Some(opts) => opts.validate(),
                None => Err(BrokerError::invalid_configuration("Lightweight pub/sub options are required.")),
            },
            BrokerType::StreamInStore => match &self.backend.stream_in_store {
                Some(opts) => opts.validate(),
                None => Err(BrokerError::invalid_configuration(
                    "Stream-in-store options are required.",
                )),
            },
        }
    }
}

/// Resolves `pattern` against a message type name, interpolating
/// `{MessageType}` (simple name) and `{MessageFullName}` (fully qualified),
/// both lowercased. Used by the broker skeleton when a publish/subscribe call
/// doesn't supply an explicit routing key.
pub fn resolve_routing_key(pattern: &str, simple_name: &str, full_name: &str) -> String {
    pattern
        .replace("{MessageType}", &simple_name.to_lowercase())
        .replace("{MessageFullName}", &full_name.to_lowercase())
}

/// Subject-based backends derive `{prefix}.{TypeName}`; `prefix` falls back
/// to `relay` when absent, empty, or whitespace-only.
pub fn resolve_subject(prefix: Option<&str>, simple_name: &str) -> String {
    let prefix = prefix.map(str::trim).filter(|p| !p.is_empty()).unwrap_or("relay");
    format!("{}.{}", prefix, simple_name)
}

/// Per-tenant rate-limit overrides keyed by tenant id, exposed here (rather
/// than only on `RateLimitConfig`) so config loaders can populate the whole
/// `BrokerOptions` tree from one deserialized document.
pub type TenantLimits = HashMap<String, f64>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_backend_bag_is_invalid_configuration() {
        let mut opts = BrokerOptions::default();
        opts.broker_type = BrokerType::CloudQueue;
        let err = opts.validate().unwrap_err();
        assert!(matches!(err, BrokerError::InvalidConfiguration(_)));
        assert!(err.to_string().contains("AWS SQS/SNS"));
    }

    #[test]
    fn amqp_rejects_empty_host_name() {
        let mut opts = BrokerOptions::default();
        opts.broker_type = BrokerType::Amqp;
        opts.backend.amqp = Some(AmqpOptions {
            host_name: String::new(),
            port: 5672,
            prefetch_count: 10,
            ..Default::default()
        });
        let err = opts.validate().unwrap_err();
        assert!(matches!(err, BrokerError::InvalidArgument(ref field) if field == "HostName"));
    }

    #[test]
    fn amqp_rejects_zero_port() {
        let mut opts = BrokerOptions::default();
        opts.broker_type = BrokerType::Amqp;
        opts.backend.amqp = Some(AmqpOptions {
            host_name: "localhost".into(),
            port: 0,
            prefetch_count: 10,
            ..Default::default()
        });
        let err = opts.validate().unwrap_err();
        assert!(matches!(err, BrokerError::InvalidArgument(ref field) if field == "Port"));
    }

    #[test]
    fn stream_in_store_requires_all_fields() {
        let mut opts = BrokerOptions::default();
        opts.broker_type = BrokerType::StreamInStore;
        opts.backend.stream_in_store = Some(StreamInStoreOptions {
            connection_string: "esdb://localhost:2113".into(),
            default_stream_name: "orders".into(),
            consumer_group_name: String::new(),
            consumer_name: "worker-1".into(),
        });
        let err = opts.validate().unwrap_err();
        assert!(matches!(err, BrokerError::InvalidArgument(ref field) if field == "ConsumerGroupName"));
    }

    #[test]
    fn valid_lightweight_options_pass() {
        let mut opts = BrokerOptions::default();
        opts.broker_type = BrokerType::Lightweight;
        opts.backend.lightweight = Some(LightweightOptions {
            servers: vec!["nats://localhost:4222".into()],
            ..Default::default()
        });
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn routing_key_interpolates_both_placeholders() {
        let resolved =
            resolve_routing_key("{MessageFullName}/{MessageType}", "OrderCreated", "orders.v1.OrderCreated");
        assert_eq!(resolved, "orders.v1.ordercreated/ordercreated");
    }

    #[test]
    fn subject_falls_back_to_relay_prefix_when_blank() {
        assert_eq!(resolve_subject(Some("   "), "OrderCreated"), "relay.OrderCreated");
        assert_eq!(resolve_subject(None, "OrderCreated"), "relay.OrderCreated");
        assert_eq!(resolve_subject(Some("orders"), "OrderCreated"), "orders.OrderCreated");
    }

    #[test]
    fn retry_policy_config_builds_matching_backoff() {
        let cfg = RetryPolicyConfig::default();
        let backoff = cfg.to_backoff();
        // exponential with multiplier 2.0: attempt 2 should be ~2x attempt 1
        let d1 = backoff.delay(1);
        let d2 = backoff.delay(2);
        assert!(d2 >= d1);
    }
}
