//! Kafka-backed distributed-log [`BackendAdapter`] (§4.6) for `relay-broker`.
//!
//! Holds one `FutureProducer` for publishing and spawns one `StreamConsumer`
//! poll loop per `subscribe_internal` call, grounded in the producer-holding
//! struct shape of the Kafka sink this crate used to be before it became a
//! full backend adapter rather than an optional telemetry destination.

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{Header, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use relay_broker::backend::{
    BackendAdapter, DeliveryContext, HeaderValue, OutboundEnvelope, SubscribeHandler,
    SubscriptionOptions,
};
use relay_broker::config::{AutoOffsetReset, DistributedLogOptions};
use relay_broker::error::BrokerError;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct KafkaAdapter {
    options: DistributedLogOptions,
    producer: FutureProducer,
    consumer_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl KafkaAdapter {
    pub fn new(options: DistributedLogOptions) -> Result<Self, BrokerError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &options.bootstrap_servers)
            .set("compression.type", &options.compression_type)
            .create()
            .map_err(|e| BrokerError::invalid_configuration(format!("kafka producer: {e}")))?;

        Ok(Self { options, producer, consumer_tasks: Mutex::new(Vec::new()) })
    }
}

#[async_trait]
impl BackendAdapter for KafkaAdapter {
    async fn start_internal(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn stop_internal(&self) -> Result<(), BrokerError> {
        for task in self.consumer_tasks.lock().await.drain(..) {
            task.abort();
        }
        Ok(())
    }

    async fn dispose_internal(&self) -> Result<(), BrokerError> {
        self.stop_internal().await
    }

    async fn publish_internal(
        &self,
        envelope: OutboundEnvelope,
        _cancellation: CancellationToken,
    ) -> Result<(), BrokerError> {
        let topic = envelope
            .routing_key
            .clone()
            .ok_or_else(|| BrokerError::invalid_argument("routing_key (Kafka topic)"))?;

        let mut headers = OwnedHeaders::new();
        for (key, value) in &envelope.headers {
            let rendered = match value {
                HeaderValue::Str(s) => s.clone(),
                HeaderValue::Int(i) => i.to_string(),
                HeaderValue::Bool(b) => b.to_string(),
            };
            headers = headers.insert(Header { key, value: Some(rendered.as_bytes()) });
        }

        let record = FutureRecord::to(&topic).payload(&envelope.bytes).headers(headers);
        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| BrokerError::TransportFailure(e.to_string()))?;
        Ok(())
    }

    async fn subscribe_internal(
        &self,
        options: SubscriptionOptions,
        handler: SubscribeHandler,
        cancellation: CancellationToken,
    ) -> Result<(), BrokerError> {
        let topic = options
            .queue_or_stream_name
            .clone()
            .ok_or_else(|| BrokerError::invalid_configuration("Kafka subscriptions require a topic name."))?;

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.options.bootstrap_servers)
            .set("group.id", &self.options.consumer_group_id)
            .set("enable.auto.commit", self.options.enable_auto_commit.to_string())
            .set(
                "auto.offset.reset",
                match self.options.auto_offset_reset {
                    AutoOffsetReset::Earliest => "earliest",
                    AutoOffsetReset::Latest => "latest",
                },
            )
            .create()
            .map_err(|e| BrokerError::invalid_configuration(format!("kafka consumer: {e}")))?;

        consumer
            .subscribe(&[topic.as_str()])
            .map_err(|e| BrokerError::invalid_configuration(e.to_string()))?;

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancellation.cancelled() => break,
                    received = consumer.recv() => {
                        match received {
                            Ok(message) => {
                                let bytes = message.payload().unwrap_or_default().to_vec();
                                let ctx = DeliveryContext::new(Default::default(), Some(topic.clone()));
                                if let Err(err) = handler(bytes, ctx, cancellation.clone()).await {
                                    tracing::warn!(error = %err, "kafka message handler failed");
                                }
                            }
                            Err(err) => tracing::warn!(error = %err, "kafka consumer recv failed"),
                        }
                    }
                }
            }
        });

        self.consumer_tasks.lock().await.push(task);
        Ok(())
    }
}
