//! EventStoreDB-backed "stream in store" [`BackendAdapter`] (§4.6) for
//! `relay-broker`.
//!
//! Publishes append to a stream (named by routing key, falling back to
//! `StreamInStoreOptions::default_stream_name`); subscriptions are
//! persistent-subscription reads against `consumer_group_name`, creating the
//! group on first use if it doesn't already exist.

use async_trait::async_trait;
use eventstore::{
    Client, EventData, PersistentSubscriptionOptions, PersistentSubscriptionToStreamOptions,
};
use futures::StreamExt;
use relay_broker::backend::{
    BackendAdapter, DeliveryContext, OutboundEnvelope, SubscribeHandler, SubscriptionOptions,
};
use relay_broker::config::StreamInStoreOptions;
use relay_broker::error::BrokerError;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct EventStoreAdapter {
    options: StreamInStoreOptions,
    client: Client,
    subscription_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl EventStoreAdapter {
    pub fn connect(options: StreamInStoreOptions) -> Result<Self, BrokerError> {
        let settings = options
            .connection_string
            .parse()
            .map_err(|e: eventstore::ClientSettingsParseError| BrokerError::invalid_configuration(e.to_string()))?;
        let client = Client::new(settings).map_err(|e| BrokerError::TransportFailure(e.to_string()))?;
        Ok(Self { options, client, subscription_tasks: Mutex::new(Vec::new()) })
    }

    fn stream_name(&self, routing_key: Option<&str>) -> String {
        routing_key.map(str::to_string).unwrap_or_else(|| self.options.default_stream_name.clone())
    }
}

#[async_trait]
impl BackendAdapter for EventStoreAdapter {
    async fn start_internal(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn stop_internal(&self) -> Result<(), BrokerError> {
        for task in self.subscription_tasks.lock().await.drain(..) {
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
        let stream_name = self.stream_name(envelope.routing_key.as_deref());
        let event = EventData::binary("relay.message", envelope.bytes);

        self.client
            .append_to_stream(stream_name, &Default::default(), event)
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
        let stream_name = options
            .queue_or_stream_name
            .clone()
            .unwrap_or_else(|| self.options.default_stream_name.clone());
        let group_name = options.consumer_group.clone().unwrap_or_else(|| self.options.consumer_group_name.clone());

        let create_result = self
            .client
            .create_persistent_subscription(&stream_name, &group_name, &PersistentSubscriptionToStreamOptions::default())
            .await;
        if let Err(err) = create_result {
            tracing::debug!(error = %err, "persistent subscription create skipped (likely already exists)");
        }

        let mut subscription = self
            .client
            .subscribe_to_persistent_subscription(&stream_name, &group_name, &PersistentSubscriptionOptions::default())
            .await
            .map_err(|e| BrokerError::TransportFailure(e.to_string()))?;

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancellation.cancelled() => break,
                    event = subscription.next() => {
                        let Some(Ok(resolved)) = event else { break };
                        let Some(recorded) = resolved.get_original_event() else { continue };
                        let data = recorded.data.to_vec();
                        let ctx = DeliveryContext::new(Default::default(), Some(stream_name.clone()));
                        match handler(data, ctx, cancellation.clone()).await {
                            Ok(()) => {
                                if let Err(err) = subscription.ack(resolved).await {
                                    tracing::warn!(error = %err, "event store ack failed");
                                }
                            }
                            Err(err) => {
                                tracing::warn!(error = %err, "event store handler failed, nacking for retry");
                                if let Err(err) = subscription
                                    .nack(resolved, eventstore::NakAction::Retry, "handler failed")
                                    .await
                                {
                                    tracing::warn!(error = %err, "event store nack failed");
                                }
                            }
                        }
                    }
                }
            }
        });

        self.subscription_tasks.lock().await.push(task);
        Ok(())
    }
}
