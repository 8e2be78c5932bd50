//! Typed payloads and the envelope codec.
//!
//! Decoding is an explicit, ordered chain: session shape, then the legacy
//! counter shape, then the legacy note shape. The first structural match wins.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::{keys, Envelope, Value, TYPE_SESSION};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("missing or malformed required field `{0}`")]
    MissingRequiredField(&'static str),

    #[error("field `{field}` has an invalid value: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("unknown message type `{0}`")]
    UnknownType(String),

    #[error("envelope does not match any known message shape")]
    UnrecognizedShape,

    #[error("envelope is not valid JSON: {0}")]
    InvalidJson(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Session,
    Counter,
    Note,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Session => "session",
            MessageKind::Counter => "counter",
            MessageKind::Note => "note",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

/// A full session submission, as produced by the origin device.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionPayload {
    pub session_name: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub mistake_count: u32,
    pub mistake_timeline: Vec<DateTime<Utc>>,
    pub notes: Option<String>,
    pub location: Option<Location>,
    pub location_name: Option<String>,
    pub error_counts: Option<BTreeMap<String, u32>>,
}

impl SessionPayload {
    /// A payload with only the required fields set.
    pub fn new(
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        mistake_timeline: Vec<DateTime<Utc>>,
    ) -> Self {
        Self {
            session_name: None,
            start_time,
            end_time,
            mistake_count: mistake_timeline.len() as u32,
            mistake_timeline,
            notes: None,
            location: None,
            location_name: None,
            error_counts: None,
        }
    }

    /// True when the timeline length disagrees with the declared count.
    pub fn timeline_mismatch(&self) -> bool {
        self.mistake_timeline.len() != self.mistake_count as usize
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Session(SessionPayload),
    Counter(u32),
    Note(String),
}

impl Payload {
    pub fn kind(&self) -> MessageKind {
        match self {
            Payload::Session(_) => MessageKind::Session,
            Payload::Counter(_) => MessageKind::Counter,
            Payload::Note(_) => MessageKind::Note,
        }
    }
}

pub fn encode(payload: &Payload) -> Envelope {
    match payload {
        Payload::Session(session) => encode_session(session),
        Payload::Counter(value) => Envelope::builder().field(keys::COUNTER, *value).build(),
        Payload::Note(text) => Envelope::builder()
            .field(keys::TEXT, text.as_str())
            .build(),
    }
}

fn encode_session(session: &SessionPayload) -> Envelope {
    let timeline = session
        .mistake_timeline
        .iter()
        .map(|at| Value::Timestamp(*at))
        .collect::<Vec<_>>();
    let error_counts = session.error_counts.as_ref().map(|counts| {
        Value::Map(
            counts
                .iter()
                .map(|(label, count)| (label.clone(), Value::from(*count)))
                .collect(),
        )
    });

    Envelope::builder()
        .field(keys::TYPE, TYPE_SESSION)
        .field(keys::START_TIME, session.start_time)
        .field(keys::END_TIME, session.end_time)
        .field(keys::MISTAKE_COUNT, session.mistake_count)
        .field(keys::MISTAKE_TIMELINE, Value::List(timeline))
        .optional(keys::SESSION_NAME, session.session_name.clone())
        .optional(keys::NOTES, session.notes.clone())
        .optional(keys::LATITUDE, session.location.map(|loc| loc.latitude))
        .optional(keys::LONGITUDE, session.location.map(|loc| loc.longitude))
        .optional(keys::LOCATION_NAME, session.location_name.clone())
        .optional(keys::ERROR_COUNTS, error_counts)
        .build()
}

/// One step of the decode chain. Returns `None` when the envelope does not
/// have this step's shape, so the next step can try.
type DecodeStep = fn(&Envelope) -> Option<Result<Payload, DecodeError>>;

/// Ordered decode chain. Order is significant: the first match wins.
pub const DECODE_CHAIN: &[(MessageKind, DecodeStep)] = &[
    (MessageKind::Session, try_session),
    (MessageKind::Counter, try_counter),
    (MessageKind::Note, try_note),
];

pub fn decode(envelope: &Envelope) -> Result<Payload, DecodeError> {
    for (_, step) in DECODE_CHAIN {
        if let Some(result) = step(envelope) {
            return result;
        }
    }
    match envelope.get(keys::TYPE).and_then(Value::as_str) {
        Some(other) => Err(DecodeError::UnknownType(other.to_string())),
        None => Err(DecodeError::UnrecognizedShape),
    }
}

/// Only `type == "session"` claims the envelope. Any other `type` falls
/// through so the legacy counter and note shapes still get their turn.
fn try_session(envelope: &Envelope) -> Option<Result<Payload, DecodeError>> {
    match envelope.get(keys::TYPE)?.as_str() {
        Some(TYPE_SESSION) => Some(decode_session(envelope).map(Payload::Session)),
        _ => None,
    }
}

fn try_counter(envelope: &Envelope) -> Option<Result<Payload, DecodeError>> {
    let value = envelope.get(keys::COUNTER)?.as_int()?;
    Some(
        u32::try_from(value)
            .map(Payload::Counter)
            .map_err(|_| DecodeError::InvalidField {
                field: keys::COUNTER,
                reason: format!("counter must be a non-negative integer, got {}", value),
            }),
    )
}

fn try_note(envelope: &Envelope) -> Option<Result<Payload, DecodeError>> {
    let text = envelope.get(keys::TEXT)?.as_str()?;
    Some(Ok(Payload::Note(text.to_string())))
}

fn decode_session(envelope: &Envelope) -> Result<SessionPayload, DecodeError> {
    let start_time = require_timestamp(envelope, keys::START_TIME)?;
    let end_time = require_timestamp(envelope, keys::END_TIME)?;
    let raw_count = envelope
        .get(keys::MISTAKE_COUNT)
        .and_then(Value::as_int)
        .ok_or(DecodeError::MissingRequiredField(keys::MISTAKE_COUNT))?;
    let mistake_count = u32::try_from(raw_count).map_err(|_| DecodeError::InvalidField {
        field: keys::MISTAKE_COUNT,
        reason: format!("mistakeCount must be non-negative, got {}", raw_count),
    })?;
    let mistake_timeline = envelope
        .get(keys::MISTAKE_TIMELINE)
        .and_then(Value::as_list)
        .and_then(|entries| entries.iter().map(Value::as_timestamp).collect::<Option<Vec<_>>>())
        .ok_or(DecodeError::MissingRequiredField(keys::MISTAKE_TIMELINE))?;

    // Coordinates are only meaningful as a pair; a lone half is dropped.
    let location = match (
        optional_float(envelope, keys::LATITUDE),
        optional_float(envelope, keys::LONGITUDE),
    ) {
        (Some(latitude), Some(longitude)) => Some(Location {
            latitude,
            longitude,
        }),
        _ => None,
    };

    Ok(SessionPayload {
        session_name: optional_string(envelope, keys::SESSION_NAME),
        start_time,
        end_time,
        mistake_count,
        mistake_timeline,
        notes: optional_string(envelope, keys::NOTES),
        location,
        location_name: optional_string(envelope, keys::LOCATION_NAME),
        error_counts: optional_counts(envelope, keys::ERROR_COUNTS),
    })
}

fn require_timestamp(envelope: &Envelope, key: &'static str) -> Result<DateTime<Utc>, DecodeError> {
    envelope
        .get(key)
        .and_then(Value::as_timestamp)
        .ok_or(DecodeError::MissingRequiredField(key))
}

fn optional_string(envelope: &Envelope, key: &str) -> Option<String> {
    envelope.get(key).and_then(Value::as_str).map(str::to_string)
}

fn optional_float(envelope: &Envelope, key: &str) -> Option<f64> {
    envelope.get(key).and_then(Value::as_float)
}

/// Malformed entries are skipped rather than failing the whole session.
fn optional_counts(envelope: &Envelope, key: &str) -> Option<BTreeMap<String, u32>> {
    let map = envelope.get(key).and_then(Value::as_map)?;
    Some(
        map.iter()
            .filter_map(|(label, value)| {
                let count = u32::try_from(value.as_int()?).ok()?;
                Some((label.clone(), count))
            })
            .collect(),
    )
}
