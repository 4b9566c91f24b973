//! Azure Service Bus-backed [`BackendAdapter`] (§4.6) for `relay-broker`.
//!
//! `CloudServiceBusOptions::entity_type` decides whether the adapter opens a
//! queue sender/receiver or a topic sender with a subscription receiver;
//! both entity kinds share the same `publish_internal`/`subscribe_internal`
//! shape once a sender or receiver handle is in hand.

use async_trait::async_trait;
use azservicebus::{
    ServiceBusClient, ServiceBusClientOptions, ServiceBusMessage, ServiceBusReceiverOptions, ServiceBusSenderOptions,
};
use relay_broker::backend::{
    BackendAdapter, DeliveryContext, HeaderValue, OutboundEnvelope, SubscribeHandler, SubscriptionOptions,
};
use relay_broker::config::{CloudServiceBusOptions, ServiceBusEntityType};
use relay_broker::error::BrokerError;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct ServiceBusAdapter {
    options: CloudServiceBusOptions,
    client: Mutex<ServiceBusClient>,
    receive_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ServiceBusAdapter {
    pub async fn connect(options: CloudServiceBusOptions) -> Result<Self, BrokerError> {
        let client = ServiceBusClient::new_from_connection_string(
            &options.connection_string,
            ServiceBusClientOptions::default(),
        )
        .await
        .map_err(|e| BrokerError::TransportFailure(e.to_string()))?;

        Ok(Self { options, client: Mutex::new(client), receive_tasks: Mutex::new(Vec::new()) })
    }

    fn entity_name(&self, routing_key: Option<&str>) -> Result<String, BrokerError> {
        routing_key
            .map(str::to_string)
            .or_else(|| self.options.default_entity_name.clone())
            .ok_or_else(|| BrokerError::invalid_configuration("No Service Bus queue/topic name resolved."))
    }
}

#[async_trait]
impl BackendAdapter for ServiceBusAdapter {
    async fn start_internal(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn stop_internal(&self) -> Result<(), BrokerError> {
        for task in self.receive_tasks.lock().await.drain(..) {
            task.abort();
        }
        Ok(())
    }

    async fn dispose_internal(&self) -> Result<(), BrokerError> {
        self.stop_internal().await?;
        self.client
            .lock()
            .await
            .dispose()
            .await
            .map_err(|e| BrokerError::TransportFailure(e.to_string()))
    }

    async fn publish_internal(
        &self,
        envelope: OutboundEnvelope,
        _cancellation: CancellationToken,
    ) -> Result<(), BrokerError> {
        let entity_name = self.entity_name(envelope.routing_key.as_deref())?;
        let mut client = self.client.lock().await;
        let mut sender = client
            .create_sender(&entity_name, ServiceBusSenderOptions::default())
            .await
            .map_err(|e| BrokerError::TransportFailure(e.to_string()))?;

        let mut message = ServiceBusMessage::new(envelope.bytes);
        for (key, value) in &envelope.headers {
            let value = match value {
                HeaderValue::Str(s) => s.clone(),
                HeaderValue::Int(i) => i.to_string(),
                HeaderValue::Bool(b) => b.to_string(),
            };
            message.set_application_property(key.clone(), value);
        }
        sender.send_message(message).await.map_err(|e| BrokerError::TransportFailure(e.to_string()))?;
        sender.dispose().await.map_err(|e| BrokerError::TransportFailure(e.to_string()))
    }

    async fn subscribe_internal(
        &self,
        options: SubscriptionOptions,
        handler: SubscribeHandler,
        cancellation: CancellationToken,
    ) -> Result<(), BrokerError> {
        let entity_name = self.entity_name(options.queue_or_stream_name.as_deref())?;
        let mut client = self.client.lock().await;

        let mut receiver = match self.options.entity_type {
            ServiceBusEntityType::Queue => client
                .create_receiver_for_queue(&entity_name, ServiceBusReceiverOptions::default())
                .await
                .map_err(|e| BrokerError::TransportFailure(e.to_string()))?,
            ServiceBusEntityType::Topic => {
                let subscription = options
                    .consumer_group
                    .clone()
                    .ok_or_else(|| BrokerError::invalid_configuration("Topic subscriptions require a subscription name."))?;
                client
                    .create_receiver_for_subscription(&entity_name, &subscription, ServiceBusReceiverOptions::default())
                    .await
                    .map_err(|e| BrokerError::TransportFailure(e.to_string()))?
            }
        };
        drop(client);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancellation.cancelled() => break,
                    received = receiver.receive_message() => {
                        let Some(message) = received else { continue };
                        let body = message.body().unwrap_or_default().to_vec();
                        let ctx = DeliveryContext::new(Default::default(), Some(entity_name.clone()));
                        match handler(body, ctx, cancellation.clone()).await {
                            Ok(()) => {
                                if let Err(err) = receiver.complete_message(&message).await {
                                    tracing::warn!(error = %err, "service bus complete_message failed");
                                }
                            }
                            Err(err) => {
                                tracing::warn!(error = %err, "service bus handler failed, abandoning message");
                                if let Err(err) = receiver.abandon_message(&message, None).await {
                                    tracing::warn!(error = %err, "service bus abandon_message failed");
                                }
                            }
                        }
                    }
                }
            }
            let _ = receiver.dispose().await;
        });

        self.receive_tasks.lock().await.push(task);
        Ok(())
    }
}
