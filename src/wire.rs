//! Envelope <-> AMQP message mapping.
//!
//! Bodies are JSON. Transport metadata lives in AMQP properties: `message_id`,
//! `timestamp`, persistent delivery mode, and the `message-type` / `retry-count` headers.

use chrono::{DateTime, SecondsFormat, Utc};
use lapin::{
    BasicProperties,
    types::{AMQPValue, FieldTable},
};
use std::collections::HashMap;

use serde::{
    Deserializer, Serialize,
    de::{self, DeserializeOwned, Visitor},
};
use serde_json::{Map, Value};

use crate::models::message::Envelope;

pub const MESSAGE_TYPE_HEADER: &str = "message-type";
pub const RETRY_COUNT_HEADER: &str = "retry-count";
pub const REQUEUED_AT_HEADER: &str = "x-requeued";
pub const REQUEUED_FROM_HEADER: &str = "x-requeued-from";
pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const PERSISTENT_DELIVERY_MODE: u8 = 2;

pub fn dead_letter_queue(queue: &str) -> String {
    format!("{}.dlq", queue)
}

pub fn encode<T: Serialize>(
    envelope: &Envelope<T>,
) -> Result<(Vec<u8>, BasicProperties), serde_json::Error> {
    let body = serde_json::to_vec(envelope)?;

    let mut headers = FieldTable::default();
    headers.insert(
        MESSAGE_TYPE_HEADER.into(),
        AMQPValue::LongString(envelope.message_type.as_str().into()),
    );
    headers.insert(
        RETRY_COUNT_HEADER.into(),
        retry_count_value(envelope.retry_count),
    );

    let properties = BasicProperties::default()
        .with_content_type(JSON_CONTENT_TYPE.into())
        .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
        .with_message_id(envelope.message_id.clone().into())
        .with_timestamp(envelope.timestamp.timestamp().max(0) as u64)
        .with_headers(headers);

    Ok((body, properties))
}

const ENVELOPE_FIELDS: &[&str] = &["messageId", "type", "timestamp", "retryCount"];

/// Decodes a JSON body. Top-level field names are matched ignoring case and `_` / `-`
/// separators, so `messageId`, `MessageId`, `message_id` and `MESSAGEID` are equivalent.
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<Envelope<T>, serde_json::Error> {
    let value = match serde_json::from_slice::<Value>(body)? {
        Value::Object(fields) => Value::Object(canonicalize_keys(fields, &known_fields::<T>())),
        other => other,
    };

    serde_json::from_value(value)
}

/// Folded name -> declared name, for the envelope and the payload `T`.
fn known_fields<T: DeserializeOwned>() -> HashMap<String, &'static str> {
    ENVELOPE_FIELDS
        .iter()
        .chain(struct_fields::<T>())
        .map(|field| (fold_key(field), *field))
        .collect()
}

fn canonicalize_keys(
    fields: Map<String, Value>,
    known: &HashMap<String, &'static str>,
) -> Map<String, Value> {
    fields
        .into_iter()
        .map(|(key, value)| {
            let canonical = known
                .get(&fold_key(&key))
                .map(|field| field.to_string())
                .unwrap_or(key);
            (canonical, value)
        })
        .collect()
}

fn fold_key(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Field names a derived `Deserialize` for `T` asks for. Empty for non-struct types.
fn struct_fields<T: DeserializeOwned>() -> &'static [&'static str] {
    let mut fields: &'static [&'static str] = &[];
    let _ = T::deserialize(FieldNames(&mut fields));
    fields
}

/// Deserializer that records the field list passed to `deserialize_struct` and then bails.
struct FieldNames<'a>(&'a mut &'static [&'static str]);

impl<'de> Deserializer<'de> for FieldNames<'_> {
    type Error = de::value::Error;

    fn deserialize_any<V: Visitor<'de>>(self, _visitor: V) -> Result<V::Value, Self::Error> {
        Err(de::Error::custom("field name lookup only"))
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        fields: &'static [&'static str],
        _visitor: V,
    ) -> Result<V::Value, Self::Error> {
        *self.0 = fields;
        Err(de::Error::custom("field name lookup only"))
    }

    serde::forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf option unit unit_struct newtype_struct seq tuple
        tuple_struct map enum identifier ignored_any
    }
}

fn header<'a>(properties: &'a BasicProperties, name: &str) -> Option<&'a AMQPValue> {
    properties
        .headers()
        .as_ref()?
        .inner()
        .iter()
        .find(|(key, _)| key.as_str() == name)
        .map(|(_, value)| value)
}

/// Reads the `retry-count` header. Absent, negative or unparseable values count as 0.
pub fn read_retry_count(properties: &BasicProperties) -> u32 {
    header(properties, RETRY_COUNT_HEADER)
        .and_then(integer_value)
        .and_then(|count| u32::try_from(count).ok())
        .unwrap_or(0)
}

pub fn read_message_type(properties: &BasicProperties) -> Option<String> {
    match header(properties, MESSAGE_TYPE_HEADER)? {
        AMQPValue::LongString(value) => Some(String::from_utf8_lossy(value.as_bytes()).into_owned()),
        AMQPValue::ShortString(value) => Some(value.as_str().to_string()),
        _ => None,
    }
}

fn integer_value(value: &AMQPValue) -> Option<i64> {
    match value {
        AMQPValue::ShortShortInt(v) => Some(i64::from(*v)),
        AMQPValue::ShortShortUInt(v) => Some(i64::from(*v)),
        AMQPValue::ShortInt(v) => Some(i64::from(*v)),
        AMQPValue::ShortUInt(v) => Some(i64::from(*v)),
        AMQPValue::LongInt(v) => Some(i64::from(*v)),
        AMQPValue::LongUInt(v) => Some(i64::from(*v)),
        AMQPValue::LongLongInt(v) => Some(*v),
        AMQPValue::LongString(v) => std::str::from_utf8(v.as_bytes())
            .ok()
            .and_then(|s| s.trim().parse().ok()),
        AMQPValue::ShortString(v) => v.as_str().trim().parse().ok(),
        _ => None,
    }
}

fn retry_count_value(retry_count: u32) -> AMQPValue {
    AMQPValue::LongInt(i32::try_from(retry_count).unwrap_or(i32::MAX))
}

pub fn message_id(properties: &BasicProperties) -> Option<String> {
    properties
        .message_id()
        .as_ref()
        .map(|id| id.as_str().to_string())
        .filter(|id| !id.is_empty())
}

fn headers_or_default(properties: &BasicProperties) -> FieldTable {
    properties.headers().clone().unwrap_or_default()
}

/// Same properties with the `retry-count` header replaced.
pub fn with_retry_count(properties: &BasicProperties, retry_count: u32) -> BasicProperties {
    let mut headers = headers_or_default(properties);
    headers.insert(RETRY_COUNT_HEADER.into(), retry_count_value(retry_count));
    properties.clone().with_headers(headers)
}

/// Properties for a dead-lettered copy: persistent, original content type and
/// message id, `retry-count` pinned at `max_retries`.
pub fn dead_letter_properties(
    properties: &BasicProperties,
    message_id: &str,
    max_retries: u32,
) -> BasicProperties {
    let mut headers = headers_or_default(properties);
    headers.insert(RETRY_COUNT_HEADER.into(), retry_count_value(max_retries));

    let content_type = properties
        .content_type()
        .as_ref()
        .map(|ct| ct.as_str().to_string())
        .unwrap_or_else(|| JSON_CONTENT_TYPE.to_string());

    BasicProperties::default()
        .with_content_type(content_type.into())
        .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
        .with_message_id(message_id.to_string().into())
        .with_headers(headers)
}

/// Properties for a dead letter replayed onto its source queue.
pub fn requeued_properties(
    properties: &BasicProperties,
    from_queue: &str,
    at: DateTime<Utc>,
) -> BasicProperties {
    let mut headers = headers_or_default(properties);
    headers.insert(
        REQUEUED_AT_HEADER.into(),
        AMQPValue::LongString(at.to_rfc3339_opts(SecondsFormat::Millis, true).into()),
    );
    headers.insert(
        REQUEUED_FROM_HEADER.into(),
        AMQPValue::LongString(from_queue.into()),
    );

    properties
        .clone()
        .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
        .with_timestamp(at.timestamp().max(0) as u64)
        .with_headers(headers)
}
