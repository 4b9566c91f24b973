//! End-to-end SQS adapter test against a real queue. Marked `#[ignore]`
//! since it needs real AWS credentials and a provisioned queue; run with
//! `cargo test -- --ignored` once both are available.

use relay_broker::backend::{BackendAdapter, OutboundEnvelope, SubscriptionOptions};
use relay_broker::config::CloudQueueOptions;
use relay_broker_sqs::SqsAdapter;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

#[tokio::test]
#[ignore]
async fn publishes_and_receives_a_message() {
    let queue_url = std::env::var("SQS_QUEUE_URL").expect("SQS_QUEUE_URL must be set");
    let options = CloudQueueOptions {
        region: std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
        access_key_id: std::env::var("AWS_ACCESS_KEY_ID").unwrap_or_default(),
        secret_access_key: std::env::var("AWS_SECRET_ACCESS_KEY").unwrap_or_default(),
        default_queue_url: Some(queue_url.clone()),
        default_topic_arn: None,
        use_fifo_queue: false,
        message_group_id: None,
        message_deduplication_id: None,
    };
    let adapter = SqsAdapter::connect(options).await.unwrap();

    let (tx, rx) = oneshot::channel();
    let tx = Arc::new(std::sync::Mutex::new(Some(tx)));
    let handler = Arc::new(move |bytes: Vec<u8>, _ctx, _cancel: CancellationToken| {
        let tx = tx.clone();
        Box::pin(async move {
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(bytes);
            }
            Ok(())
        }) as std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), relay_broker::error::BrokerError>> + Send>>
    });

    let sub_options = SubscriptionOptions { queue_or_stream_name: Some(queue_url.clone()), ..Default::default() };
    adapter
        .subscribe_internal(sub_options, handler, CancellationToken::new())
        .await
        .unwrap();

    let mut envelope = OutboundEnvelope::new(b"hello sqs".to_vec());
    envelope.routing_key = Some(queue_url);
    adapter.publish_internal(envelope, CancellationToken::new()).await.unwrap();

    let received = rx.await.unwrap();
    assert_eq!(received, b"hello sqs");
}
