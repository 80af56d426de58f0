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
        message::{Envelope, MessageType, RescheduleMessage},
    },
};

pub struct RescheduleConfirmationHandler {
    store: Arc<dyn BookingStore>,
    templates: Arc<dyn TemplateBuilder>,
    mailer: Arc<dyn MailSender>,
}

impl RescheduleConfirmationHandler {
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
impl DeliveryHandler for RescheduleConfirmationHandler {
    type Message = RescheduleMessage;

    async fn handle(
        &self,
        envelope: &Envelope<RescheduleMessage>,
        correlation_id: &str,
    ) -> Result<(), HandlerError> {
        expect_type(envelope, MessageType::RescheduleConfirmation)?;

        let booking_id = envelope.payload.booking_id;

        let booking = self
            .store
            .find_booking(booking_id)
            .await
            .map_err(HandlerError::Transient)?
            .ok_or_else(|| {
                warn!(booking_id, correlation_id, "Booking not found for reschedule email");
                HandlerError::Permanent(anyhow!("Booking {} not found", booking_id))
            })?;

        let body = self
            .templates
            .reschedule_confirmation(&booking)
            .map_err(HandlerError::Permanent)?;

        let email = EmailMessage::html(
            booking.user.email.clone(),
            Some(booking.user.name.clone()),
            format!("Trip Rescheduled Successfully - Booking #{}", booking_id),
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
            "Reschedule confirmation email sent"
        );

        Ok(())
    }
}
