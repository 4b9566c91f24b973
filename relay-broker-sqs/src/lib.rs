//! AWS SQS/SNS-backed cloud-queue [`BackendAdapter`] (§4.6) for `relay-broker`.
//!
//! Publishes go straight to SQS unless `default_topic_arn` is set, in which
//! case they fan out through SNS instead (topic-to-queue subscriptions are
//! the caller's infrastructure concern, not this adapter's). FIFO group/dedup
//! IDs are applied here via [`apply_fifo_semantics`], driven by
//! `CloudQueueOptions::use_fifo_queue` — the generic broker never decides
//! this, since it's transport-specific.

use async_trait::async_trait;
use aws_sdk_sns::Client as SnsClient;
use aws_sdk_sqs::Client as SqsClient;
use relay_broker::backend::{
    apply_fifo_semantics, BackendAdapter, DeliveryContext, OutboundEnvelope, SubscribeHandler, SubscriptionOptions,
};
use relay_broker::config::CloudQueueOptions;
use relay_broker::error::BrokerError;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct SqsAdapter {
    options: CloudQueueOptions,
    sqs: SqsClient,
    sns: SnsClient,
    poll_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SqsAdapter {
    pub async fn connect(options: CloudQueueOptions) -> Result<Self, BrokerError> {
        let region = aws_sdk_sqs::config::Region::new(options.region.clone());
        let credentials = aws_sdk_sqs::config::Credentials::new(
            options.access_key_id.clone(),
            options.secret_access_key.clone(),
            None,
            None,
            "relay-broker",
        );
        let shared_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(region)
            .credentials_provider(credentials)
            .load()
            .await;

        let sqs = SqsClient::new(&shared_config);
        let sns = SnsClient::new(&shared_config);
        Ok(Self { options, sqs, sns, poll_tasks: Mutex::new(Vec::new()) })
    }
}

#[async_trait]
impl BackendAdapter for SqsAdapter {
    async fn start_internal(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn stop_internal(&self) -> Result<(), BrokerError> {
        for task in self.poll_tasks.lock().await.drain(..) {
            task.abort();
        }
        Ok(())
    }

    async fn dispose_internal(&self) -> Result<(), BrokerError> {
        self.stop_internal().await
    }

    async fn publish_internal(
        &self,
        mut envelope: OutboundEnvelope,
        _cancellation: CancellationToken,
    ) -> Result<(), BrokerError> {
        apply_fifo_semantics(
            &mut envelope,
            self.options.use_fifo_queue,
            self.options.message_group_id.as_deref(),
            || uuid::Uuid::new_v4().to_string(),
        );

        let body = String::from_utf8(envelope.bytes)
            .map_err(|e| BrokerError::InvalidData(format!("SQS/SNS payloads must be UTF-8: {e}")))?;

        if let Some(topic_arn) = &self.options.default_topic_arn {
            let mut request = self.sns.publish().topic_arn(topic_arn).message(body);
            if let Some(group_id) = &envelope.message_group_id {
                request = request.message_group_id(group_id);
            }
            if let Some(dedup_id) = &envelope.message_deduplication_id {
                request = request.message_deduplication_id(dedup_id);
            }
            request.send().await.map_err(|e| BrokerError::TransportFailure(e.to_string()))?;
            return Ok(());
        }

        // The broker's generic routing key is a pattern-derived topic-like
        // string (e.g. "ordercreated"), never a real SQS queue URL, so the
        // queue to publish to always comes from configuration, not envelope.routing_key.
        let queue_url = self
            .options
            .default_queue_url
            .clone()
            .ok_or_else(|| BrokerError::invalid_configuration("DefaultQueueUrl is required for consuming messages."))?;

        let mut request = self.sqs.send_message().queue_url(queue_url).message_body(body);
        if let Some(group_id) = &envelope.message_group_id {
            request = request.message_group_id(group_id);
        }
        if let Some(dedup_id) = &envelope.message_deduplication_id {
            request = request.message_deduplication_id(dedup_id);
        }
        request.send().await.map_err(|e| BrokerError::TransportFailure(e.to_string()))?;
        Ok(())
    }

    async fn subscribe_internal(
        &self,
        options: SubscriptionOptions,
        handler: SubscribeHandler,
        cancellation: CancellationToken,
    ) -> Result<(), BrokerError> {
        let queue_url = options
            .queue_or_stream_name
            .clone()
            .or_else(|| self.options.default_queue_url.clone())
            .ok_or_else(|| BrokerError::invalid_configuration("SQS subscriptions require a queue URL."))?;

        let sqs = self.sqs.clone();
        let wait_time = 20;
        let max_messages = options.prefetch_count.map(|n| n.min(10) as i32).unwrap_or(10);

        let task = tokio::spawn(async move {
            loop {
                if cancellation.is_cancelled() {
                    break;
                }
                let received = tokio::select! {
                    _ = cancellation.cancelled() => break,
                    result = sqs
                        .receive_message()
                        .queue_url(&queue_url)
                        .wait_time_seconds(wait_time)
                        .max_number_of_messages(max_messages)
                        .send() => result,
                };
                let messages = match received {
                    Ok(output) => output.messages.unwrap_or_default(),
                    Err(err) => {
                        tracing::warn!(error = %err, "sqs receive_message failed");
                        continue;
                    }
                };

                for message in messages {
                    let body = message.body.clone().unwrap_or_default();
                    let ctx = DeliveryContext::new(Default::default(), Some(queue_url.clone()));
                    let result = handler(body.into_bytes(), ctx, cancellation.clone()).await;
                    match result {
                        Ok(()) => {
                            if let Some(receipt_handle) = message.receipt_handle {
                                if let Err(err) =
                                    sqs.delete_message().queue_url(&queue_url).receipt_handle(receipt_handle).send().await
                                {
                                    tracing::warn!(error = %err, "sqs delete_message failed");
                                }
                            }
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "sqs handler failed, leaving message for redelivery");
                        }
                    }
                }
            }
        });

        self.poll_tasks.lock().await.push(task);
        Ok(())
    }
}
