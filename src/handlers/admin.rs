use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::{
    clients::mail::MailSender,
    error::HandlerError,
    handlers::{DeliveryHandler, expect_type},
    models::{
        email::EmailMessage,
        message::{AdminNotificationMessage, Envelope, MessageType},
        validation::validate_admin_notification,
    },
};

/// Relays an admin alert verbatim to the admin mailbox.
pub struct AdminNotificationHandler {
    mailer: Arc<dyn MailSender>,
}

impl AdminNotificationHandler {
    pub fn new(mailer: Arc<dyn MailSender>) -> Self {
        Self { mailer }
    }
}

#[async_trait]
impl DeliveryHandler for AdminNotificationHandler {
    type Message = AdminNotificationMessage;

    async fn handle(
        &self,
        envelope: &Envelope<AdminNotificationMessage>,
        correlation_id: &str,
    ) -> Result<(), HandlerError> {
        expect_type(envelope, MessageType::AdminNotification)?;

        let message = &envelope.payload;

        validate_admin_notification(message).map_err(|e| {
            warn!(correlation_id, error = %e, "Rejecting invalid admin notification");
            HandlerError::Permanent(e)
        })?;

        let email = EmailMessage::html(
            message.admin_email.clone(),
            None,
            message.subject.clone(),
            message.body.clone(),
        );

        self.mailer
            .send(&email, correlation_id)
            .await
            .map_err(HandlerError::Transient)?;

        info!(
            correlation_id,
            booking_id = ?message.booking_id,
            to = %message.admin_email,
            "Admin notification email sent"
        );

        Ok(())
    }
}
