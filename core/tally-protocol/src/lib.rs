//! Wire types for the Tally peer link.
//!
//! This crate is shared by both ends of the link (watch and phone) so the
//! envelope shape cannot drift between them. Envelopes are transport-neutral
//! maps; [`codec`] turns them into typed [`Payload`]s and back.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod codec;

pub use codec::{decode, encode, DecodeError, Payload, SessionPayload};

/// Upper bound for a JSON-materialized envelope (CLI ingest, fixtures).
pub const MAX_ENVELOPE_BYTES: usize = 256 * 1024;

/// Discriminant value carried by full session submissions.
pub const TYPE_SESSION: &str = "session";

/// Wire keys. Names are fixed by the deployed peers and must not change.
pub mod keys {
    pub const TYPE: &str = "type";
    pub const TEXT: &str = "text";
    pub const COUNTER: &str = "counter";
    pub const SESSION_NAME: &str = "sessionName";
    pub const START_TIME: &str = "startTime";
    pub const END_TIME: &str = "endTime";
    pub const MISTAKE_COUNT: &str = "mistakeCount";
    pub const MISTAKE_TIMELINE: &str = "mistakeTimeline";
    pub const NOTES: &str = "notes";
    pub const LATITUDE: &str = "latitude";
    pub const LONGITUDE: &str = "longitude";
    pub const LOCATION_NAME: &str = "locationName";
    pub const ERROR_COUNTS: &str = "errorCounts";
}

/// A primitive value carried by an [`Envelope`].
///
/// When an envelope is materialized as JSON, timestamps become RFC 3339
/// strings and come back as [`Value::String`]; the codec accepts both forms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Integers widen to floats; coordinates may arrive either way.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(value) => Some(*value),
            Value::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(value) => Some(*value),
            Value::String(value) => DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(values) => Some(values.as_slice()),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Timestamp(value)
    }
}

/// Transport-neutral keyed payload exchanged between the two devices.
///
/// Envelopes are immutable once built. Construct them with
/// [`Envelope::builder`] or [`codec::encode`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Envelope {
    fields: BTreeMap<String, Value>,
}

impl Envelope {
    pub fn builder() -> EnvelopeBuilder {
        EnvelopeBuilder::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The `type` discriminant, if the envelope carries one.
    pub fn message_type(&self) -> Option<&str> {
        self.get(keys::TYPE).and_then(Value::as_str)
    }

    pub fn to_json(&self) -> Result<String, DecodeError> {
        serde_json::to_string(self).map_err(|err| DecodeError::InvalidJson(err.to_string()))
    }

    /// Parses a JSON object into an envelope. Non-object documents are rejected.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() > MAX_ENVELOPE_BYTES {
            return Err(DecodeError::InvalidJson(format!(
                "envelope exceeds {} bytes",
                MAX_ENVELOPE_BYTES
            )));
        }
        serde_json::from_slice(bytes).map_err(|err| DecodeError::InvalidJson(err.to_string()))
    }
}

#[derive(Debug, Default)]
pub struct EnvelopeBuilder {
    fields: BTreeMap<String, Value>,
}

impl EnvelopeBuilder {
    pub fn field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Inserts the field only when `value` is `Some`; absence means "no value".
    pub fn optional<T: Into<Value>>(self, key: &str, value: Option<T>) -> Self {
        match value {
            Some(value) => self.field(key, value),
            None => self,
        }
    }

    pub fn build(self) -> Envelope {
        Envelope {
            fields: self.fields,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_skips_absent_optionals() {
        let envelope = Envelope::builder()
            .field(keys::TEXT, "hello")
            .optional::<String>(keys::NOTES, None)
            .build();
        assert_eq!(envelope.len(), 1);
        assert!(!envelope.contains(keys::NOTES));
    }

    #[test]
    fn json_timestamps_are_readable_as_strings() {
        let envelope = Envelope::from_json_slice(
            br#"{"type":"session","startTime":"2026-01-30T09:00:00Z"}"#,
        )
        .expect("parse envelope");
        assert_eq!(envelope.message_type(), Some(TYPE_SESSION));
        let start = envelope
            .get(keys::START_TIME)
            .and_then(Value::as_timestamp)
            .expect("timestamp");
        assert_eq!(start.to_rfc3339(), "2026-01-30T09:00:00+00:00");
    }

    #[test]
    fn json_numbers_keep_integer_shape() {
        let envelope =
            Envelope::from_json_slice(br#"{"counter":4,"latitude":51.5}"#).expect("parse");
        assert_eq!(envelope.get(keys::COUNTER), Some(&Value::Int(4)));
        assert_eq!(envelope.get(keys::LATITUDE), Some(&Value::Float(51.5)));
    }

    #[test]
    fn rejects_non_object_json() {
        assert!(Envelope::from_json_slice(b"[1,2,3]").is_err());
        assert!(Envelope::from_json_slice(b"not json").is_err());
    }
}
