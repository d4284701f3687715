//! Domain event publishing on NATS.

use async_trait::async_trait;
use tracing::debug;

use super::FanoutError;
use crate::domain::events::OrderEvent;

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &OrderEvent) -> Result<(), FanoutError>;
}

#[derive(Clone)]
pub struct NatsPublisher {
    client: async_nats::Client,
}

impl NatsPublisher {
    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EventPublisher for NatsPublisher {
    async fn publish(&self, event: &OrderEvent) -> Result<(), FanoutError> {
        let payload = serde_json::to_vec(event).map_err(|e| FanoutError::Publish(e.to_string()))?;
        self.client
            .publish(event.subject().to_string(), payload.into())
            .await
            .map_err(|e| FanoutError::Publish(e.to_string()))?;
        debug!(subject = event.subject(), order_id = event.order_id(), "event published");
        Ok(())
    }
}
