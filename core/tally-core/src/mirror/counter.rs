//! Mistake counter mirrored into the shared region.
//!
//! The count and the mistake timeline are always committed together so that a
//! widget never renders a count that disagrees with the timeline.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use super::region::{RegionSnapshot, RegionWrite, SharedRegion};
use crate::clock::Clock;
use crate::error::RegionError;
use crate::widgets::WidgetRefreshTrigger;

pub const COUNTER_KEY: &str = "counterValue";
pub const TIMELINE_KEY: &str = "mistakeTimeline";
pub const SESSION_START_KEY: &str = "sessionStartTime";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CounterState {
    pub value: u32,
    pub mistake_timeline: Vec<DateTime<Utc>>,
    pub session_start_time: DateTime<Utc>,
}

pub struct CounterStore {
    region: Arc<dyn SharedRegion>,
    widgets: WidgetRefreshTrigger,
    clock: Arc<dyn Clock>,
    // Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl CounterStore {
    pub fn new(
        region: Arc<dyn SharedRegion>,
        widgets: WidgetRefreshTrigger,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store = Self {
            region,
            widgets,
            clock,
            write_lock: Mutex::new(()),
        };
        store.ensure_session_start();
        store
    }

    pub fn is_shared(&self) -> bool {
        self.region.is_shared()
    }

    pub fn snapshot(&self) -> Result<CounterState, RegionError> {
        let snapshot = self.region.snapshot()?;
        Ok(self.state_from(&snapshot))
    }

    pub fn increment(&self) -> Result<CounterState, RegionError> {
        let _guard = self.lock()?;
        let mut state = self.snapshot()?;
        state.value += 1;
        state.mistake_timeline.push(self.clock.now());
        self.write_counts(&state)?;
        debug!(value = state.value, "Counter incremented");
        self.widgets.notify_changed("counter_increment");
        Ok(state)
    }

    /// Undoes the most recent mistake. A no-op at zero.
    pub fn decrement(&self) -> Result<CounterState, RegionError> {
        let _guard = self.lock()?;
        let mut state = self.snapshot()?;
        if state.value == 0 {
            return Ok(state);
        }
        state.value -= 1;
        state.mistake_timeline.pop();
        self.write_counts(&state)?;
        debug!(value = state.value, "Counter decremented");
        self.widgets.notify_changed("counter_decrement");
        Ok(state)
    }

    /// Starts a new session: clears the count and timeline and moves the
    /// session start marker forward.
    pub fn reset(&self) -> Result<CounterState, RegionError> {
        let _guard = self.lock()?;
        let previous = self.snapshot()?;
        let state = CounterState {
            value: 0,
            mistake_timeline: Vec::new(),
            session_start_time: self.clock.now().max(previous.session_start_time),
        };
        self.region.commit(&[
            RegionWrite::int(COUNTER_KEY, 0),
            RegionWrite::blob(TIMELINE_KEY, encode_timeline(&state.mistake_timeline)?),
            RegionWrite::blob(SESSION_START_KEY, state.session_start_time.to_rfc3339()),
        ])?;
        debug!(session_start = %state.session_start_time, "Counter reset");
        self.widgets.notify_changed("counter_reset");
        Ok(state)
    }

    /// Applies a count received from the peer. The timeline is trimmed from
    /// the end or padded with "now" so its length matches the new count.
    pub fn apply_remote_count(&self, value: u32) -> Result<CounterState, RegionError> {
        let _guard = self.lock()?;
        let mut state = self.snapshot()?;
        let target = value as usize;
        if state.mistake_timeline.len() > target {
            state.mistake_timeline.truncate(target);
        } else {
            let now = self.clock.now();
            state.mistake_timeline.resize(target, now);
        }
        state.value = value;
        self.write_counts(&state)?;
        debug!(value, "Counter synced from peer");
        self.widgets.notify_changed("counter_remote");
        Ok(state)
    }

    fn write_counts(&self, state: &CounterState) -> Result<(), RegionError> {
        self.region.commit(&[
            RegionWrite::int(COUNTER_KEY, i64::from(state.value)),
            RegionWrite::blob(TIMELINE_KEY, encode_timeline(&state.mistake_timeline)?),
        ])
    }

    fn state_from(&self, snapshot: &RegionSnapshot) -> CounterState {
        let mistake_timeline = snapshot
            .get_blob(TIMELINE_KEY)
            .map(|blob| {
                serde_json::from_str::<Vec<DateTime<Utc>>>(blob).unwrap_or_else(|err| {
                    warn!(error = %err, "Malformed mistake timeline; treating as empty");
                    Vec::new()
                })
            })
            .unwrap_or_default();

        let stored_value = snapshot.get_int(COUNTER_KEY).unwrap_or(0);
        // The timeline is the source of truth if the pair ever disagrees
        // (e.g. a region written by an older build).
        if stored_value != mistake_timeline.len() as i64 {
            warn!(
                stored_value,
                timeline_len = mistake_timeline.len(),
                "Counter value disagrees with timeline; using timeline length"
            );
        }

        let session_start_time = snapshot
            .get_blob(SESSION_START_KEY)
            .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| self.clock.now());

        CounterState {
            value: mistake_timeline.len() as u32,
            mistake_timeline,
            session_start_time,
        }
    }

    fn ensure_session_start(&self) {
        if self.region.get_blob(SESSION_START_KEY).is_some() {
            return;
        }
        let now = self.clock.now().to_rfc3339();
        if let Err(err) = self.region.set_blob(SESSION_START_KEY, &now) {
            warn!(error = %err, "Failed to initialize session start marker");
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ()>, RegionError> {
        self.write_lock
            .lock()
            .map_err(|_| RegionError::WriteFailed("counter write lock poisoned".to_string()))
    }
}

fn encode_timeline(timeline: &[DateTime<Utc>]) -> Result<String, RegionError> {
    serde_json::to_string(timeline).map_err(|err| RegionError::Malformed {
        key: TIMELINE_KEY.to_string(),
        details: err.to_string(),
    })
}
