//! Shared integration-test helpers: a minimal in-memory [`BackendAdapter`]
//! used wherever a test needs a working broker but doesn't care about the
//! transport underneath.

use async_trait::async_trait;
use relay_broker::backend::{BackendAdapter, DeliveryContext, OutboundEnvelope, SubscribeHandler, SubscriptionOptions};
use relay_broker::error::BrokerError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct FakeBackend {
    pub publish_count: AtomicUsize,
    pub published: Mutex<Vec<Vec<u8>>>,
}

#[async_trait]
impl BackendAdapter for FakeBackend {
    async fn start_internal(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn stop_internal(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn dispose_internal(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn publish_internal(
        &self,
        envelope: OutboundEnvelope,
        _cancellation: CancellationToken,
    ) -> Result<(), BrokerError> {
        self.publish_count.fetch_add(1, Ordering::SeqCst);
        self.published.lock().unwrap().push(envelope.bytes);
        Ok(())
    }

    async fn subscribe_internal(
        &self,
        _options: SubscriptionOptions,
        handler: SubscribeHandler,
        cancellation: CancellationToken,
    ) -> Result<(), BrokerError> {
        let _ = handler(Vec::new(), DeliveryContext::new(Default::default(), None), cancellation).await;
        Ok(())
    }
}
