use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::{
    clients::{database::BookingStore, mail::MailSender, template::TemplateBuilder},
    error::HandlerError,
    handlers::{DeliveryHandler, expect_type},
    models::{
        email::EmailMessage,
        message::{BookingMessage, Envelope, MessageType},
    },
};

pub struct BookingConfirmationHandler {
    store: Arc<dyn BookingStore>,
    templates: Arc<dyn TemplateBuilder>,
    mailer: Arc<dyn MailSender>,
}

impl BookingConfirmationHandler {
    pub fn new(
        store: Arc<dyn BookingStore>,
        templates: Arc<dyn TemplateBuilder>,
        mailer: Arc<dyn MailSender>,
    ) -> Self {
        Self {
            store,
            templates,
            mailer,
        }
    }
}

#[async_trait]
impl DeliveryHandler for BookingConfirmationHandler {
    type Message = BookingMessage;

    async fn handle(
        &self,
        envelope: &Envelope<BookingMessage>,
        correlation_id: &str,
    ) -> Result<(), HandlerError> {
        expect_type(envelope, MessageType::BookingConfirmation)?;

        let booking_id = envelope.payload.booking_id;

        let booking = self
            .store
            .find_booking(booking_id)
            .await
            .map_err(HandlerError::Transient)?
            .ok_or_else(|| {
                warn!(booking_id, correlation_id, "Booking not found for confirmation email");
                HandlerError::Permanent(anyhow!("Booking {} not found", booking_id))
            })?;

        let destination_names = booking.destination_names();

        let body = self
            .templates
            .booking_confirmation(&booking.user.name, &booking, &destination_names)
            .map_err(HandlerError::Permanent)?;

        let email = EmailMessage::html(
            booking.user.email.clone(),
            Some(booking.user.name.clone()),
            format!("Booking Confirmed - Booking #{}", booking_id),
            body,
        );

        self.mailer
            .send(&email, correlation_id)
            .await
            .map_err(HandlerError::Transient)?;

        info!(
            booking_id,
            correlation_id,
            to = %email.to_email,
            "Booking confirmation email sent"
        );

        Ok(())
    }
}
