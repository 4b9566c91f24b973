//! AMQP (RabbitMQ) [`BackendAdapter`] (§4.6) for `relay-broker`.
//!
//! Holds one `lapin::Channel` for both publish and consume; `subscribe`
//! spawns one `basic_consume` poll loop per call and acks/naks according to
//! the subscription's `auto_ack` flag and the handler's result.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, ExchangeDeclareOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use relay_broker::backend::{
    BackendAdapter, DeliveryContext, HeaderValue, OutboundEnvelope, SubscribeHandler, SubscriptionOptions,
};
use relay_broker::config::AmqpOptions;
use relay_broker::error::BrokerError;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct AmqpAdapter {
    options: AmqpOptions,
    connection: Connection,
    channel: Channel,
    consumer_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AmqpAdapter {
    pub async fn connect(options: AmqpOptions) -> Result<Self, BrokerError> {
        let uri = format!(
            "amqp://{}:{}@{}:{}/{}",
            options.user_name, options.password, options.host_name, options.port, options.virtual_host
        );
        let connection = Connection::connect(&uri, ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::TransportFailure(e.to_string()))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::TransportFailure(e.to_string()))?;
        channel
            .basic_qos(options.prefetch_count, Default::default())
            .await
            .map_err(|e| BrokerError::TransportFailure(e.to_string()))?;

        Ok(Self { options, connection, channel, consumer_tasks: Mutex::new(Vec::new()) })
    }

    fn exchange_kind(&self) -> ExchangeKind {
        match self.options.exchange_type.as_str() {
            "fanout" => ExchangeKind::Fanout,
            "direct" => ExchangeKind::Direct,
            "headers" => ExchangeKind::Headers,
            _ => ExchangeKind::Topic,
        }
    }
}

#[async_trait]
impl BackendAdapter for AmqpAdapter {
    async fn start_internal(&self) -> Result<(), BrokerError> {
        self.channel
            .exchange_declare(
                "relay",
                self.exchange_kind(),
                ExchangeDeclareOptions { durable: true, ..Default::default() },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::TransportFailure(e.to_string()))
    }

    async fn stop_internal(&self) -> Result<(), BrokerError> {
        for task in self.consumer_tasks.lock().await.drain(..) {
            task.abort();
        }
        Ok(())
    }

    async fn dispose_internal(&self) -> Result<(), BrokerError> {
        self.stop_internal().await?;
        self.connection
            .close(0, "disposed")
            .await
            .map_err(|e| BrokerError::TransportFailure(e.to_string()))
    }

    async fn publish_internal(
        &self,
        envelope: OutboundEnvelope,
        _cancellation: CancellationToken,
    ) -> Result<(), BrokerError> {
        let routing_key = envelope.routing_key.clone().unwrap_or_default();
        let mut properties = BasicProperties::default();
        let mut headers = FieldTable::default();
        for (key, value) in &envelope.headers {
            let field = match value {
                HeaderValue::Str(s) => lapin::types::AMQPValue::LongString(s.as_str().into()),
                HeaderValue::Int(i) => lapin::types::AMQPValue::LongLongInt(*i),
                HeaderValue::Bool(b) => lapin::types::AMQPValue::Boolean(*b),
            };
            headers.insert(key.as_str().into(), field);
        }
        properties = properties.with_headers(headers);

        self.channel
            .basic_publish("relay", &routing_key, BasicPublishOptions::default(), &envelope.bytes, properties)
            .await
            .map_err(|e| BrokerError::TransportFailure(e.to_string()))?
            .await
            .map_err(|e| BrokerError::TransportFailure(e.to_string()))?;
        Ok(())
    }

    async fn subscribe_internal(
        &self,
        options: SubscriptionOptions,
        handler: SubscribeHandler,
        cancellation: CancellationToken,
    ) -> Result<(), BrokerError> {
        let queue_name = options
            .queue_or_stream_name
            .clone()
            .ok_or_else(|| BrokerError::invalid_configuration("AMQP subscriptions require a queue name."))?;

        self.channel
            .queue_declare(
                &queue_name,
                QueueDeclareOptions {
                    durable: options.durable,
                    exclusive: options.exclusive,
                    auto_delete: options.auto_delete,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::TransportFailure(e.to_string()))?;

        if let Some(pattern) = &options.routing_key_or_topic_pattern {
            self.channel
                .queue_bind(&queue_name, "relay", pattern, Default::default(), FieldTable::default())
                .await
                .map_err(|e| BrokerError::TransportFailure(e.to_string()))?;
        }

        let auto_ack = options.auto_ack;
        let mut consumer = self
            .channel
            .basic_consume(
                &queue_name,
                "relay-broker-consumer",
                BasicConsumeOptions { no_ack: auto_ack, ..Default::default() },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::TransportFailure(e.to_string()))?;

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancellation.cancelled() => break,
                    delivery = consumer.next() => {
                        let Some(delivery) = delivery else { break };
                        let Ok(delivery) = delivery else {
                            tracing::warn!("amqp delivery error");
                            continue;
                        };
                        let redelivered = delivery.redelivered;
                        let ctx = DeliveryContext { headers: Default::default(), routing_key: Some(delivery.routing_key.to_string()), redelivered };
                        let result = handler(delivery.data.clone(), ctx, cancellation.clone()).await;
                        if !auto_ack {
                            match result {
                                Ok(()) => {
                                    let _ = delivery.ack(BasicAckOptions::default()).await;
                                }
                                Err(err) => {
                                    tracing::warn!(error = %err, "amqp handler failed, nacking");
                                    let _ = delivery.nack(BasicNackOptions { requeue: true, ..Default::default() }).await;
                                }
                            }
                        }
                    }
                }
            }
        });

        self.consumer_tasks.lock().await.push(task);
        Ok(())
    }
}
