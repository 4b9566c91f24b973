//! End-to-end NATS adapter test against a real broker. Marked `#[ignore]`
//! since it needs a running NATS server; run with `cargo test -- --ignored`
//! once one is reachable.

use relay_broker::backend::{BackendAdapter, OutboundEnvelope, SubscriptionOptions};
use relay_broker::config::LightweightOptions;
use relay_broker_nats::NatsAdapter;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

#[tokio::test]
#[ignore]
async fn publishes_and_receives_a_message() {
    let addr = std::env::var("NATS_URL").unwrap_or_else(|_| "nats://127.0.0.1:4222".to_string());
    let options = LightweightOptions { servers: vec![addr], ..Default::default() };
    let adapter = NatsAdapter::connect(&options).await.unwrap();

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

    let sub_options =
        SubscriptionOptions { routing_key_or_topic_pattern: Some("relay.test".to_string()), ..Default::default() };
    adapter
        .subscribe_internal(sub_options, handler, CancellationToken::new())
        .await
        .unwrap();

    let mut envelope = OutboundEnvelope::new(b"hello nats".to_vec());
    envelope.routing_key = Some("relay.test".to_string());
    adapter.publish_internal(envelope, CancellationToken::new()).await.unwrap();

    let received = rx.await.unwrap();
    assert_eq!(received, b"hello nats");
}
