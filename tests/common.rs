use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::Duration,
};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use lapin::BasicProperties;
use notification_pipeline::{
    clients::{channel::DeliveryChannel, database::BookingStore, mail::MailSender},
    consumer::{ConsumerSettings, IncomingDelivery},
    error::{HandlerError, PipelineError},
    handlers::DeliveryHandler,
    models::{
        booking::{Booking, BookingUser},
        email::EmailMessage,
        message::{BookingMessage, Envelope, MessageType},
        retry::{BackoffConfig, RetryPolicy},
    },
    wire,
};

pub const TEST_QUEUE: &str = "travel.bookings.test";
pub const TEST_DLX: &str = "travel.dlx.test";

#[derive(Debug, Clone)]
pub enum ChannelCall {
    Ack(u64),
    Nack {
        delivery_tag: u64,
        requeue: bool,
    },
    Publish {
        exchange: String,
        routing_key: String,
        body: Vec<u8>,
        properties: BasicProperties,
    },
}

/// In-memory stand-in for a consumer's broker channel.
#[derive(Default)]
pub struct RecordingChannel {
    calls: Mutex<Vec<ChannelCall>>,
    pub fail_publish: AtomicBool,
    pub fail_ack: AtomicBool,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<ChannelCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn publishes(&self) -> Vec<ChannelCall> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, ChannelCall::Publish { .. }))
            .collect()
    }

    /// Turns the most recent publish into the broker's next delivery.
    pub fn redeliver_last_publish(&self, delivery_tag: u64) -> Option<IncomingDelivery> {
        self.calls()
            .into_iter()
            .rev()
            .find_map(|call| match call {
                ChannelCall::Publish {
                    body, properties, ..
                } => Some(IncomingDelivery {
                    delivery_tag,
                    data: body,
                    properties,
                }),
                _ => None,
            })
    }
}

#[async_trait]
impl DeliveryChannel for RecordingChannel {
    async fn ack(&self, delivery_tag: u64) -> Result<(), PipelineError> {
        if self.fail_ack.load(Ordering::SeqCst) {
            return Err(PipelineError::NotConnected);
        }
        self.calls.lock().unwrap().push(ChannelCall::Ack(delivery_tag));
        Ok(())
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), PipelineError> {
        self.calls.lock().unwrap().push(ChannelCall::Nack {
            delivery_tag,
            requeue,
        });
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: BasicProperties,
    ) -> Result<(), PipelineError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(PipelineError::PublishFailed {
                queue: routing_key.to_string(),
                reason: "publisher channel closed".to_string(),
            });
        }

        self.calls.lock().unwrap().push(ChannelCall::Publish {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body: body.to_vec(),
            properties,
        });
        Ok(())
    }
}

/// Fails the first `failures` invocations, then succeeds.
pub struct ScriptedHandler {
    failures: u32,
    permanent: bool,
    delay: Duration,
    calls: AtomicU32,
    seen_ids: Mutex<Vec<String>>,
}

impl ScriptedHandler {
    pub fn failing(failures: u32) -> Self {
        Self {
            failures,
            permanent: false,
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
            seen_ids: Mutex::new(Vec::new()),
        }
    }

    pub fn always_failing() -> Self {
        Self::failing(u32::MAX)
    }

    pub fn permanently_failing() -> Self {
        Self {
            permanent: true,
            ..Self::failing(u32::MAX)
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::failing(0)
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen_ids(&self) -> Vec<String> {
        self.seen_ids.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliveryHandler for ScriptedHandler {
    type Message = BookingMessage;

    async fn handle(
        &self,
        _envelope: &Envelope<BookingMessage>,
        correlation_id: &str,
    ) -> Result<(), HandlerError> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_ids
            .lock()
            .unwrap()
            .push(correlation_id.to_string());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if attempt < self.failures {
            let error = anyhow!("mail relay unavailable (attempt {})", attempt + 1);
            return Err(if self.permanent {
                HandlerError::Permanent(error)
            } else {
                HandlerError::Transient(error)
            });
        }

        Ok(())
    }
}

pub fn test_settings(max_retries: u32, retry_delay: Duration) -> ConsumerSettings {
    ConsumerSettings {
        queue: TEST_QUEUE.to_string(),
        dead_letter_exchange: TEST_DLX.to_string(),
        policy: RetryPolicy {
            max_retries,
            retry_delay,
        },
        consumer_tag: "test-consumer".to_string(),
        resubscribe_backoff: BackoffConfig::default(),
    }
}

pub fn booking_message(booking_id: i32) -> BookingMessage {
    BookingMessage {
        booking_id,
        user_id: 7,
        user_name: "Ada Lovelace".to_string(),
        user_email: "ada@example.com".to_string(),
        destinations: vec!["Lisbon".to_string(), "Porto".to_string()],
        total_price: 1249.5,
        guests: 2,
        nights: 4,
        start_date: Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap(),
        confirmed: true,
        created_at: Utc.with_ymd_and_hms(2026, 5, 1, 9, 30, 0).unwrap(),
    }
}

pub fn booking_envelope(booking_id: i32) -> Envelope<BookingMessage> {
    Envelope::new(MessageType::BookingConfirmation, booking_message(booking_id))
}

/// Encodes `envelope` the way the publisher does and wraps it as a fresh delivery.
pub fn delivery_for(envelope: &Envelope<BookingMessage>, delivery_tag: u64) -> Result<IncomingDelivery> {
    let (data, properties) = wire::encode(envelope)?;
    Ok(IncomingDelivery {
        delivery_tag,
        data,
        properties,
    })
}

pub fn booking(booking_id: i32) -> Booking {
    Booking {
        booking_id,
        user: BookingUser {
            user_id: 7,
            name: "Ada Lovelace".to_string(),
            email: "ada@store.example.com".to_string(),
        },
        destinations: vec!["Lisbon".to_string(), " ".to_string(), "Porto".to_string()],
        total_price: 1249.5,
        guests: 2,
        nights: 4,
        start_date: Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap(),
        confirmed: true,
        created_at: Utc.with_ymd_and_hms(2026, 5, 1, 9, 30, 0).unwrap(),
    }
}

#[derive(Default)]
pub struct InMemoryBookingStore {
    bookings: HashMap<i32, Booking>,
    pub unavailable: AtomicBool,
}

impl InMemoryBookingStore {
    pub fn with_bookings(bookings: Vec<Booking>) -> Self {
        Self {
            bookings: bookings
                .into_iter()
                .map(|booking| (booking.booking_id, booking))
                .collect(),
            unavailable: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl BookingStore for InMemoryBookingStore {
    async fn find_booking(&self, booking_id: i32) -> Result<Option<Booking>, Error> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(anyhow!("connection refused"));
        }
        Ok(self.bookings.get(&booking_id).cloned())
    }

    async fn health_check(&self) -> Result<(), Error> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(anyhow!("connection refused"));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<(EmailMessage, String)>>,
    pub fail: AtomicBool,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<(EmailMessage, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailSender for RecordingMailer {
    async fn send(&self, email: &EmailMessage, correlation_id: &str) -> Result<(), Error> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("SMTP relay timed out"));
        }
        self.sent
            .lock()
            .unwrap()
            .push((email.clone(), correlation_id.to_string()));
        Ok(())
    }
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
