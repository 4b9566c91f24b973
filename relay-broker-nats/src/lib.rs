//! NATS-backed lightweight pub/sub [`BackendAdapter`] (§4.6) for `relay-broker`.
//!
//! This crate used to be a `PolicyEvent` telemetry sink built on the
//! deprecated synchronous `nats` crate; it's now a full backend adapter on
//! the maintained async `async-nats` client. Publish/subscribe map directly
//! onto NATS subjects, with `relay.{prefix}` subject resolution left to
//! `relay_broker::config::resolve_subject` at the call site.

use async_trait::async_trait;
use futures::StreamExt;
use relay_broker::backend::{
    BackendAdapter, DeliveryContext, OutboundEnvelope, SubscribeHandler, SubscriptionOptions,
};
use relay_broker::config::LightweightOptions;
use relay_broker::error::BrokerError;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct NatsAdapter {
    client: async_nats::Client,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl NatsAdapter {
    pub async fn connect(options: &LightweightOptions) -> Result<Self, BrokerError> {
        if options.servers.is_empty() {
            return Err(BrokerError::invalid_configuration("Lightweight pub/sub options are required."));
        }

        let mut connect_options = async_nats::ConnectOptions::new();
        if let (Some(user), Some(password)) = (&options.username, &options.password) {
            connect_options = connect_options.user_and_password(user.clone(), password.clone());
        }
        if let Some(name) = &options.name {
            connect_options = connect_options.name(name.clone());
        }
        if let Some(max_reconnects) = options.max_reconnects {
            connect_options = connect_options.max_reconnects(max_reconnects as usize);
        }

        let client = connect_options
            .connect(options.servers.join(","))
            .await
            .map_err(|e| BrokerError::TransportFailure(e.to_string()))?;

        Ok(Self { client, tasks: Mutex::new(Vec::new()) })
    }
}

#[async_trait]
impl BackendAdapter for NatsAdapter {
    async fn start_internal(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn stop_internal(&self) -> Result<(), BrokerError> {
        for task in self.tasks.lock().await.drain(..) {
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
        let subject = envelope
            .routing_key
            .clone()
            .ok_or_else(|| BrokerError::invalid_argument("routing_key (NATS subject)"))?;
        self.client
            .publish(subject, envelope.bytes.into())
            .await
            .map_err(|e| BrokerError::TransportFailure(e.to_string()))
    }

    async fn subscribe_internal(
        &self,
        options: SubscriptionOptions,
        handler: SubscribeHandler,
        cancellation: CancellationToken,
    ) -> Result<(), BrokerError> {
        let subject = options
            .routing_key_or_topic_pattern
            .clone()
            .ok_or_else(|| BrokerError::invalid_configuration("NATS subscriptions require a subject."))?;

        let mut subscriber = self
            .client
            .subscribe(subject.clone())
            .await
            .map_err(|e| BrokerError::TransportFailure(e.to_string()))?;

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancellation.cancelled() => break,
                    message = subscriber.next() => {
                        match message {
                            Some(message) => {
                                let ctx = DeliveryContext::new(Default::default(), Some(subject.clone()));
                                if let Err(err) = handler(message.payload.to_vec(), ctx, cancellation.clone()).await {
                                    tracing::warn!(error = %err, "nats message handler failed");
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        self.tasks.lock().await.push(task);
        Ok(())
    }
}
