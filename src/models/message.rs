use std::{
    collections::HashMap,
    fmt::{Display, Formatter, Result as FmtResult},
};

use chrono::{DateTime, Utc};
use serde::{
    Deserialize, Deserializer, Serialize,
    de::{self, DeserializeOwned, Visitor},
};
use uuid::Uuid;

/// Category of a domain event, carried in the body and in the `message-type` header.
///
/// Serialized as the variant name. Deserialization also accepts the numeric codes
/// older producers write (`0` = `BookingConfirmation` through `4` = `AdminNotification`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MessageType {
    BookingConfirmation,
    BookingCancelled,
    CancellationRequested,
    CancellationDecision,
    AdminNotification,
    RescheduleConfirmation,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::BookingConfirmation => "BookingConfirmation",
            MessageType::BookingCancelled => "BookingCancelled",
            MessageType::CancellationRequested => "CancellationRequested",
            MessageType::CancellationDecision => "CancellationDecision",
            MessageType::AdminNotification => "AdminNotification",
            MessageType::RescheduleConfirmation => "RescheduleConfirmation",
        }
    }
}

impl MessageType {
    const NAMES: &'static [&'static str] = &[
        "BookingConfirmation",
        "BookingCancelled",
        "CancellationRequested",
        "CancellationDecision",
        "AdminNotification",
        "RescheduleConfirmation",
    ];

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(MessageType::BookingConfirmation),
            1 => Some(MessageType::BookingCancelled),
            2 => Some(MessageType::CancellationRequested),
            3 => Some(MessageType::CancellationDecision),
            4 => Some(MessageType::AdminNotification),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        if name.eq_ignore_ascii_case("CancellationRequest") {
            return Some(MessageType::CancellationRequested);
        }

        [
            MessageType::BookingConfirmation,
            MessageType::BookingCancelled,
            MessageType::CancellationRequested,
            MessageType::CancellationDecision,
            MessageType::AdminNotification,
            MessageType::RescheduleConfirmation,
        ]
        .into_iter()
        .find(|candidate| candidate.as_str().eq_ignore_ascii_case(name))
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(MessageTypeVisitor)
    }
}

struct MessageTypeVisitor;

impl<'de> Visitor<'de> for MessageTypeVisitor {
    type Value = MessageType;

    fn expecting(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str("a message type name or numeric code")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<MessageType, E> {
        if let Some(message_type) = MessageType::from_name(value) {
            return Ok(message_type);
        }

        match value.trim().parse::<u64>() {
            Ok(code) => self.visit_u64(code),
            Err(_) => Err(E::unknown_variant(value, MessageType::NAMES)),
        }
    }

    fn visit_u64<E: de::Error>(self, code: u64) -> Result<MessageType, E> {
        MessageType::from_code(code).ok_or_else(|| {
            E::invalid_value(de::Unexpected::Unsigned(code), &"a message type code from 0 to 4")
        })
    }

    fn visit_i64<E: de::Error>(self, code: i64) -> Result<MessageType, E> {
        match u64::try_from(code) {
            Ok(code) => self.visit_u64(code),
            Err(_) => Err(E::invalid_value(
                de::Unexpected::Signed(code),
                &"a message type code from 0 to 4",
            )),
        }
    }
}

impl Display for MessageType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// Anything that can ride inside an [`Envelope`].
pub trait Payload: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Payload for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Typed wrapper shared by producers and consumers.
///
/// `message_id` is assigned once by the producer and never changes across retries;
/// the authoritative retry counter travels in the `retry-count` transport header,
/// `retry_count` here only records the value at publish time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    pub message_id: String,

    #[serde(rename = "type")]
    pub message_type: MessageType,

    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub retry_count: u32,

    #[serde(flatten)]
    pub payload: T,
}

impl<T> Envelope<T> {
    pub fn new(message_type: MessageType, payload: T) -> Self {
        Self {
            message_id: Uuid::new_v4().simple().to_string(),
            message_type,
            timestamp: Utc::now(),
            retry_count: 0,
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingMessage {
    pub booking_id: i32,
    pub user_id: i32,
    pub user_name: String,
    pub user_email: String,
    pub destinations: Vec<String>,
    #[serde(default)]
    pub total_price: f64,
    #[serde(default)]
    pub guests: i32,
    #[serde(default)]
    pub nights: i32,
    pub start_date: DateTime<Utc>,
    #[serde(default)]
    pub confirmed: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RescheduleMessage {
    pub booking_id: i32,
    pub user_id: i32,
    pub user_name: String,
    pub user_email: String,
    pub destinations: Vec<String>,
    #[serde(default)]
    pub total_price: f64,
    #[serde(default)]
    pub guests: i32,
    #[serde(default)]
    pub nights: i32,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminNotificationMessage {
    pub admin_email: String,
    pub subject: String,
    pub body: String,

    #[serde(default)]
    pub booking_id: Option<i32>,
    #[serde(default)]
    pub user_id: Option<i32>,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub user_email: Option<String>,

    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}
