use std::{collections::HashMap, sync::atomic::Ordering};

use anyhow::{Result, anyhow};
use notification_pipeline::{
    clients::template::{HtmlTemplateBuilder, TemplateBuilder, replace_variables},
    error::HandlerError,
    handlers::{
        AdminNotificationHandler, BookingConfirmationHandler, DeliveryHandler,
        RescheduleConfirmationHandler,
    },
    models::message::{
        AdminNotificationMessage, Envelope, MessageType, RescheduleMessage,
    },
};
use serde_json::json;

use crate::common::{
    InMemoryBookingStore, RecordingMailer, booking, booking_message, shared,
};

fn booking_handler(
    store: &std::sync::Arc<InMemoryBookingStore>,
    mailer: &std::sync::Arc<RecordingMailer>,
) -> BookingConfirmationHandler {
    BookingConfirmationHandler::new(
        store.clone(),
        shared(HtmlTemplateBuilder::new()),
        mailer.clone(),
    )
}

fn reschedule_envelope(booking_id: i32) -> Envelope<RescheduleMessage> {
    let message = booking_message(booking_id);
    Envelope::new(
        MessageType::RescheduleConfirmation,
        RescheduleMessage {
            booking_id,
            user_id: message.user_id,
            user_name: message.user_name,
            user_email: message.user_email,
            destinations: message.destinations,
            total_price: message.total_price,
            guests: message.guests,
            nights: message.nights,
            start_date: message.start_date,
            end_date: message.start_date + chrono::Duration::days(4),
            created_at: message.created_at,
        },
    )
}

fn admin_envelope(subject: &str) -> Envelope<AdminNotificationMessage> {
    Envelope::new(
        MessageType::AdminNotification,
        AdminNotificationMessage {
            admin_email: "ops@example.com".to_string(),
            subject: subject.to_string(),
            body: "<p>Booking #42 needs attention</p>".to_string(),
            booking_id: Some(42),
            user_id: None,
            user_name: None,
            user_email: None,
            metadata: HashMap::new(),
        },
    )
}

/// Test: Booking confirmations go to the user recorded in the store
#[tokio::test]
async fn test_booking_confirmation_uses_store_state() -> Result<()> {
    let store = shared(InMemoryBookingStore::with_bookings(vec![booking(42)]));
    let mailer = shared(RecordingMailer::default());
    let handler = booking_handler(&store, &mailer);

    let envelope = Envelope::new(MessageType::BookingConfirmation, booking_message(42));
    handler.handle(&envelope, "corr-1").await?;

    let sent = mailer.sent();
    assert_eq!(sent.len(), 1);

    let (email, correlation_id) = &sent[0];
    assert_eq!(email.to_email, "ada@store.example.com", "Payload email must not be trusted");
    assert_eq!(email.to_name.as_deref(), Some("Ada Lovelace"));
    assert_eq!(email.subject, "Booking Confirmed - Booking #42");
    assert!(email.is_html);
    assert!(email.body.contains("Lisbon, Porto"));
    assert!(email.body.contains("1249.50"));
    assert_eq!(correlation_id, "corr-1");

    Ok(())
}

/// Test: Unknown bookings are permanent failures
#[tokio::test]
async fn test_missing_booking_is_permanent() -> Result<()> {
    let store = shared(InMemoryBookingStore::default());
    let mailer = shared(RecordingMailer::default());
    let handler = booking_handler(&store, &mailer);

    let envelope = Envelope::new(MessageType::BookingConfirmation, booking_message(404));
    let result = handler.handle(&envelope, "corr-2").await;

    assert!(matches!(result, Err(HandlerError::Permanent(_))));
    assert!(mailer.sent().is_empty());

    Ok(())
}

/// Test: Store and mail outages are transient failures
#[tokio::test]
async fn test_outages_are_transient() -> Result<()> {
    let store = shared(InMemoryBookingStore::with_bookings(vec![booking(42)]));
    let mailer = shared(RecordingMailer::default());
    let handler = booking_handler(&store, &mailer);
    let envelope = Envelope::new(MessageType::BookingConfirmation, booking_message(42));

    store.unavailable.store(true, Ordering::SeqCst);
    let result = handler.handle(&envelope, "corr-3").await;
    assert!(matches!(result, Err(HandlerError::Transient(_))));

    store.unavailable.store(false, Ordering::SeqCst);
    mailer.fail.store(true, Ordering::SeqCst);
    let result = handler.handle(&envelope, "corr-3").await;
    assert!(matches!(result, Err(HandlerError::Transient(_))));

    Ok(())
}

/// Test: Envelopes of the wrong category are rejected permanently
#[tokio::test]
async fn test_wrong_message_type_is_permanent() -> Result<()> {
    let store = shared(InMemoryBookingStore::with_bookings(vec![booking(42)]));
    let mailer = shared(RecordingMailer::default());
    let handler = booking_handler(&store, &mailer);

    let envelope = Envelope::new(MessageType::BookingCancelled, booking_message(42));
    let result = handler.handle(&envelope, "corr-4").await;

    assert!(matches!(result, Err(HandlerError::Permanent(_))));
    assert!(mailer.sent().is_empty());

    Ok(())
}

/// Test: Reschedule confirmations use their own subject line
#[tokio::test]
async fn test_reschedule_confirmation() -> Result<()> {
    let store = shared(InMemoryBookingStore::with_bookings(vec![booking(42)]));
    let mailer = shared(RecordingMailer::default());
    let handler = RescheduleConfirmationHandler::new(
        store.clone(),
        shared(HtmlTemplateBuilder::new()),
        mailer.clone(),
    );

    handler.handle(&reschedule_envelope(42), "corr-5").await?;

    let sent = mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0.subject, "Trip Rescheduled Successfully - Booking #42");
    assert!(sent[0].0.body.contains("June 5, 2026"), "End date is start + nights");

    let missing = handler.handle(&reschedule_envelope(7), "corr-6").await;
    assert!(matches!(missing, Err(HandlerError::Permanent(_))));

    Ok(())
}

/// Test: Admin notifications are relayed verbatim to the admin address
#[tokio::test]
async fn test_admin_notification_is_relayed() -> Result<()> {
    let mailer = shared(RecordingMailer::default());
    let handler = AdminNotificationHandler::new(mailer.clone());

    handler
        .handle(&admin_envelope("Cancellation requested"), "corr-7")
        .await?;

    let sent = mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0.to_email, "ops@example.com");
    assert_eq!(sent[0].0.subject, "Cancellation requested");
    assert_eq!(sent[0].0.body, "<p>Booking #42 needs attention</p>");

    Ok(())
}

/// Test: Invalid admin notifications are permanent failures
#[tokio::test]
async fn test_invalid_admin_notification_is_permanent() -> Result<()> {
    let mailer = shared(RecordingMailer::default());
    let handler = AdminNotificationHandler::new(mailer.clone());

    let too_long = "x".repeat(151);
    let result = handler.handle(&admin_envelope(&too_long), "corr-8").await;
    assert!(matches!(result, Err(HandlerError::Permanent(_))));

    let mut bad_address = admin_envelope("Hello");
    bad_address.payload.admin_email = "not-an-email".to_string();
    let result = handler.handle(&bad_address, "corr-8").await;
    assert!(matches!(result, Err(HandlerError::Permanent(_))));

    assert!(mailer.sent().is_empty());

    Ok(())
}

/// Test: User-provided text is HTML-escaped in rendered bodies
#[tokio::test]
async fn test_template_escapes_user_input() -> Result<()> {
    let builder = HtmlTemplateBuilder::new();
    let booking = booking(42);

    let body = builder.booking_confirmation("<script>alert(1)</script>", &booking, &[])?;

    assert!(body.contains("&lt;script&gt;alert(1)&lt;/script&gt;"));
    assert!(!body.contains("<script>"));
    assert!(body.contains("Not specified"), "Empty destinations fall back to a placeholder");

    Ok(())
}

/// Test: Unreplaced placeholders are rendering errors
#[tokio::test]
async fn test_missing_template_variable_is_error() -> Result<()> {
    let variables = HashMap::from([("name".to_string(), json!("Ada"))]);

    let rendered = replace_variables("Hello {{name}}", &variables)?;
    assert_eq!(rendered, "Hello Ada");

    let result = replace_variables("Hello {{name}}, booking {{booking_id}}", &variables);
    let error = result
        .err()
        .ok_or_else(|| anyhow!("Expected a missing-variable error"))?;
    assert!(error.to_string().contains("{{booking_id}}"));

    Ok(())
}
