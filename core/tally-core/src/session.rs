//! Durable session records and the vocabulary used to annotate them.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, FixedOffset, Local, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tally_protocol::codec::Location;
use tally_protocol::SessionPayload;

/// A practice session as persisted on the receiving device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub mistake_count: u32,
    pub mistake_timeline: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub location_name: Option<String>,
    #[serde(default)]
    pub error_counts: Option<BTreeMap<String, u32>>,
    /// Content hash used to drop redelivered submissions.
    pub dedup_key: String,
}

impl SessionRecord {
    /// Builds a new record with a fresh id. `offset` selects the clock used
    /// for auto-naming; `None` means the device's local time.
    pub fn from_payload(payload: &SessionPayload, offset: Option<FixedOffset>) -> Self {
        let name = payload
            .session_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| auto_name(payload.start_time, offset));

        Self {
            id: ulid::Ulid::new().to_string(),
            name,
            start_time: payload.start_time,
            end_time: payload.end_time,
            mistake_count: payload.mistake_count,
            mistake_timeline: payload.mistake_timeline.clone(),
            notes: payload.notes.clone(),
            latitude: payload.location.map(|loc| loc.latitude),
            longitude: payload.location.map(|loc| loc.longitude),
            location_name: payload.location_name.clone(),
            error_counts: payload.error_counts.clone(),
            dedup_key: dedup_key(payload),
        }
    }

    pub fn location(&self) -> Option<Location> {
        match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Some(Location {
                latitude,
                longitude,
            }),
            _ => None,
        }
    }

    pub fn duration(&self) -> Duration {
        self.end_time.signed_duration_since(self.start_time)
    }

    pub fn mistakes_per_hour(&self) -> f64 {
        let hours = self.duration().num_milliseconds() as f64 / 3_600_000.0;
        if hours > 0.0 {
            self.mistake_count as f64 / hours
        } else {
            0.0
        }
    }

    /// Mistakes that have been assigned a category.
    pub fn total_categorized(&self) -> u32 {
        self.error_counts
            .as_ref()
            .map(|counts| counts.values().sum())
            .unwrap_or(0)
    }
}

/// Name for a session that arrived without one, by hour of day.
pub fn auto_name(start_time: DateTime<Utc>, offset: Option<FixedOffset>) -> String {
    let hour = match offset {
        Some(offset) => start_time.with_timezone(&offset).hour(),
        None => start_time.with_timezone(&Local).hour(),
    };
    name_for_hour(hour).to_string()
}

pub fn name_for_hour(hour: u32) -> &'static str {
    match hour {
        5..=11 => "Morning Practice",
        12..=16 => "Afternoon Practice",
        17..=20 => "Evening Practice",
        _ => "Practice Session",
    }
}

/// MD5 over the fields the origin device fixes at submit time.
pub fn dedup_key(payload: &SessionPayload) -> String {
    let material = format!(
        "{}|{}|{}",
        payload.start_time.to_rfc3339(),
        payload.end_time.to_rfc3339(),
        payload.mistake_count
    );
    format!("{:x}", md5::compute(material))
}

/// Categories a mistake can be filed under. Labels are persisted as
/// `errorCounts` keys and must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    #[serde(rename = "Serve Error")]
    ServeError,
    #[serde(rename = "Lob Miss")]
    LobMiss,
    #[serde(rename = "Missed Return")]
    MissedReturn,
    #[serde(rename = "Overhit Return")]
    OverhitReturn,
    #[serde(rename = "Kitchen Fault")]
    KitchenFault,
    #[serde(rename = "Slow Net Transition")]
    SlowNetTransition,
    #[serde(rename = "Power Over Control")]
    PowerOverControl,
    #[serde(rename = "Communication Error")]
    CommunicationError,
    #[serde(rename = "Positioning Error")]
    PositioningError,
    #[serde(rename = "Recovery Miss")]
    RecoveryMiss,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 10] = [
        ErrorCategory::ServeError,
        ErrorCategory::LobMiss,
        ErrorCategory::MissedReturn,
        ErrorCategory::OverhitReturn,
        ErrorCategory::KitchenFault,
        ErrorCategory::SlowNetTransition,
        ErrorCategory::PowerOverControl,
        ErrorCategory::CommunicationError,
        ErrorCategory::PositioningError,
        ErrorCategory::RecoveryMiss,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ErrorCategory::ServeError => "Serve Error",
            ErrorCategory::LobMiss => "Lob Miss",
            ErrorCategory::MissedReturn => "Missed Return",
            ErrorCategory::OverhitReturn => "Overhit Return",
            ErrorCategory::KitchenFault => "Kitchen Fault",
            ErrorCategory::SlowNetTransition => "Slow Net Transition",
            ErrorCategory::PowerOverControl => "Power Over Control",
            ErrorCategory::CommunicationError => "Communication Error",
            ErrorCategory::PositioningError => "Positioning Error",
            ErrorCategory::RecoveryMiss => "Recovery Miss",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ErrorCategory::ServeError => "Net or out of bounds",
            ErrorCategory::LobMiss => "Attacked or failed to clear",
            ErrorCategory::MissedReturn => "Failed serve return",
            ErrorCategory::OverhitReturn => "Long or out of bounds",
            ErrorCategory::KitchenFault => "Stepped into non-volley zone",
            ErrorCategory::SlowNetTransition => "Failed to advance after return",
            ErrorCategory::PowerOverControl => "Excessive force vs placement",
            ErrorCategory::CommunicationError => "Poor coordination with partner",
            ErrorCategory::PositioningError => "Late reaction or flat-footed",
            ErrorCategory::RecoveryMiss => "Failed to reset after wide/deep shots",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|category| category.label() == label)
    }
}
