//! End-to-end AMQP adapter test against a real broker. Marked `#[ignore]`
//! since it needs a running RabbitMQ instance; run with
//! `cargo test -- --ignored` once one is reachable.

use relay_broker::backend::{BackendAdapter, OutboundEnvelope, SubscriptionOptions};
use relay_broker::config::AmqpOptions;
use relay_broker_amqp::AmqpAdapter;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

fn options(host_name: &str) -> AmqpOptions {
    AmqpOptions {
        host_name: host_name.to_string(),
        port: 5672,
        user_name: "guest".to_string(),
        password: "guest".to_string(),
        virtual_host: "/".to_string(),
        exchange_type: "topic".to_string(),
        prefetch_count: 10,
    }
}

#[tokio::test]
#[ignore]
async fn publishes_and_receives_a_message() {
    let host = std::env::var("AMQP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let adapter = AmqpAdapter::connect(options(&host)).await.unwrap();
    adapter.start_internal().await.unwrap();

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

    let sub_options = SubscriptionOptions {
        queue_or_stream_name: Some("relay-broker-test-queue".to_string()),
        routing_key_or_topic_pattern: Some("relay.test".to_string()),
        auto_ack: true,
        ..Default::default()
    };
    adapter
        .subscribe_internal(sub_options, handler, CancellationToken::new())
        .await
        .unwrap();

    let mut envelope = OutboundEnvelope::new(b"hello amqp".to_vec());
    envelope.routing_key = Some("relay.test".to_string());
    adapter.publish_internal(envelope, CancellationToken::new()).await.unwrap();

    let received = rx.await.unwrap();
    assert_eq!(received, b"hello amqp");
}
