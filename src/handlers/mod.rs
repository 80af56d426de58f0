pub mod admin;
pub mod booking;
pub mod reschedule;

use anyhow::anyhow;
use async_trait::async_trait;

use crate::{
    error::HandlerError,
    models::message::{Envelope, MessageType, Payload},
};

pub use admin::AdminNotificationHandler;
pub use booking::BookingConfirmationHandler;
pub use reschedule::RescheduleConfirmationHandler;

/// Per-category delivery logic invoked by the reliable consumer.
///
/// Return [`HandlerError::Permanent`] when retrying cannot change the outcome; every
/// other failure is retried up to the consumer's policy and then dead-lettered.
#[async_trait]
pub trait DeliveryHandler: Send + Sync + 'static {
    type Message: Payload;

    async fn handle(
        &self,
        envelope: &Envelope<Self::Message>,
        correlation_id: &str,
    ) -> Result<(), HandlerError>;
}

/// Rejects envelopes routed to the wrong category.
pub(crate) fn expect_type<T>(
    envelope: &Envelope<T>,
    expected: MessageType,
) -> Result<(), HandlerError> {
    if envelope.message_type == expected {
        Ok(())
    } else {
        Err(HandlerError::Permanent(anyhow!(
            "Expected {} message but received {}",
            expected,
            envelope.message_type
        )))
    }
}
