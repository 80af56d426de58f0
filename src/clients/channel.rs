use async_trait::async_trait;
use lapin::{
    BasicProperties, Channel,
    options::{BasicAckOptions, BasicNackOptions, BasicPublishOptions},
};

use crate::error::PipelineError;

/// The settle/publish operations the reliable consumer performs on its own channel.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn ack(&self, delivery_tag: u64) -> Result<(), PipelineError>;

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), PipelineError>;

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: BasicProperties,
    ) -> Result<(), PipelineError>;
}

#[async_trait]
impl DeliveryChannel for Channel {
    async fn ack(&self, delivery_tag: u64) -> Result<(), PipelineError> {
        self.basic_ack(delivery_tag, BasicAckOptions::default())
            .await?;

        Ok(())
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), PipelineError> {
        self.basic_nack(
            delivery_tag,
            BasicNackOptions {
                multiple: false,
                requeue,
            },
        )
        .await?;

        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: BasicProperties,
    ) -> Result<(), PipelineError> {
        self.basic_publish(
            exchange.into(),
            routing_key.into(),
            BasicPublishOptions::default(),
            body,
            properties,
        )
        .await?
        .await?;

        Ok(())
    }
}
