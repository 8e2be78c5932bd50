//! Durable session storage.
//!
//! The reconciler only inserts and the viewing UI annotates; nothing in the
//! sync core deletes a record. Redelivered submissions are absorbed by the
//! `dedup_key` uniqueness constraint.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};

use crate::error::StoreError;
use crate::session::SessionRecord;

/// Result of an insert.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted(SessionRecord),
    /// A record with the same dedup key already existed; nothing was written.
    Duplicate(SessionRecord),
}

impl InsertOutcome {
    pub fn record(&self) -> &SessionRecord {
        match self {
            InsertOutcome::Inserted(record) | InsertOutcome::Duplicate(record) => record,
        }
    }

    pub fn into_record(self) -> SessionRecord {
        match self {
            InsertOutcome::Inserted(record) | InsertOutcome::Duplicate(record) => record,
        }
    }
}

pub trait SessionStore: Send + Sync {
    fn insert(&self, record: &SessionRecord) -> Result<InsertOutcome, StoreError>;

    fn get(&self, id: &str) -> Result<Option<SessionRecord>, StoreError>;

    /// Most recent first, by start time.
    fn list_recent(&self, limit: usize) -> Result<Vec<SessionRecord>, StoreError>;

    fn count(&self) -> Result<usize, StoreError>;

    fn rename(&self, id: &str, name: &str) -> Result<SessionRecord, StoreError>;

    fn set_notes(&self, id: &str, notes: Option<&str>) -> Result<SessionRecord, StoreError>;

    fn set_location(
        &self,
        id: &str,
        latitude: f64,
        longitude: f64,
        name: Option<&str>,
    ) -> Result<SessionRecord, StoreError>;

    fn set_error_counts(
        &self,
        id: &str,
        counts: &BTreeMap<String, u32>,
    ) -> Result<SessionRecord, StoreError>;
}

pub struct SqliteSessionStore {
    path: PathBuf,
}

const SELECT_COLUMNS: &str = "id, name, start_time, end_time, mistake_count, mistake_timeline, \
     notes, latitude, longitude, location_name, error_counts, dedup_key";

impl SqliteSessionStore {
    pub fn new(path: PathBuf) -> Result<Self, StoreError> {
        let store = Self { path };
        store.init_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "BEGIN;
                 CREATE TABLE IF NOT EXISTS sessions (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    start_time TEXT NOT NULL,
                    end_time TEXT NOT NULL,
                    mistake_count INTEGER NOT NULL,
                    mistake_timeline TEXT NOT NULL,
                    notes TEXT,
                    latitude REAL,
                    longitude REAL,
                    location_name TEXT,
                    error_counts TEXT,
                    dedup_key TEXT NOT NULL UNIQUE
                 );
                 CREATE INDEX IF NOT EXISTS idx_sessions_start_time ON sessions(start_time);
                 COMMIT;",
            )
            .map_err(|err| StoreError::Open(format!("Failed to initialize schema: {}", err)))
        })
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.open()?;
        op(&mut conn)
    }

    fn open(&self) -> Result<Connection, StoreError> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent)
                .map_err(|err| StoreError::Open(format!("Failed to create data dir: {}", err)))?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(|err| StoreError::Open(format!("Failed to open sqlite db: {}", err)))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|err| StoreError::Open(format!("Failed to enable WAL: {}", err)))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|err| StoreError::Open(format!("Failed to set synchronous: {}", err)))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|err| StoreError::Open(format!("Failed to set busy_timeout: {}", err)))?;

        Ok(conn)
    }

    fn update_and_fetch(
        &self,
        id: &str,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<SessionRecord, StoreError> {
        self.with_connection(|conn| {
            let changed = conn
                .execute(sql, params)
                .map_err(|err| StoreError::StoreWriteFailed(format!("Failed to update session: {}", err)))?;
            if changed == 0 {
                return Err(StoreError::NotFound(id.to_string()));
            }
            fetch_one(conn, "id", id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))
        })
    }
}

impl SessionStore for SqliteSessionStore {
    fn insert(&self, record: &SessionRecord) -> Result<InsertOutcome, StoreError> {
        let timeline = serde_json::to_string(&record.mistake_timeline).map_err(|err| {
            StoreError::StoreWriteFailed(format!("Failed to serialize timeline: {}", err))
        })?;
        let error_counts = record
            .error_counts
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|err| {
                StoreError::StoreWriteFailed(format!("Failed to serialize error counts: {}", err))
            })?;

        self.with_connection(|conn| {
            let tx = conn
                .transaction()
                .map_err(|err| StoreError::StoreWriteFailed(format!("Failed to begin: {}", err)))?;

            let inserted = tx
                .execute(
                    "INSERT INTO sessions \
                        (id, name, start_time, end_time, mistake_count, mistake_timeline, \
                         notes, latitude, longitude, location_name, error_counts, dedup_key) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12) \
                     ON CONFLICT(dedup_key) DO NOTHING",
                    params![
                        record.id,
                        record.name,
                        format_time(record.start_time),
                        format_time(record.end_time),
                        record.mistake_count,
                        timeline,
                        record.notes,
                        record.latitude,
                        record.longitude,
                        record.location_name,
                        error_counts,
                        record.dedup_key,
                    ],
                )
                .map_err(|err| {
                    StoreError::StoreWriteFailed(format!("Failed to insert session: {}", err))
                })?;

            let outcome = if inserted == 1 {
                InsertOutcome::Inserted(record.clone())
            } else {
                let existing = fetch_one(&tx, "dedup_key", &record.dedup_key)?.ok_or_else(|| {
                    StoreError::StoreWriteFailed(
                        "Insert skipped but no record holds the dedup key".to_string(),
                    )
                })?;
                InsertOutcome::Duplicate(existing)
            };

            tx.commit()
                .map_err(|err| StoreError::StoreWriteFailed(format!("Failed to commit: {}", err)))?;
            Ok(outcome)
        })
    }

    fn get(&self, id: &str) -> Result<Option<SessionRecord>, StoreError> {
        self.with_connection(|conn| fetch_one(conn, "id", id))
    }

    fn list_recent(&self, limit: usize) -> Result<Vec<SessionRecord>, StoreError> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM sessions ORDER BY start_time DESC, id DESC LIMIT ?1",
                    SELECT_COLUMNS
                ))
                .map_err(|err| StoreError::Query(format!("Failed to prepare query: {}", err)))?;

            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let rows = stmt
                .query_map([limit], RawRow::from_row)
                .map_err(|err| StoreError::Query(format!("Failed to read rows: {}", err)))?;

            let mut records = Vec::new();
            for row in rows {
                let raw = row.map_err(|err| StoreError::Query(format!("Failed to decode row: {}", err)))?;
                records.push(raw.into_record()?);
            }
            Ok(records)
        })
    }

    fn count(&self) -> Result<usize, StoreError> {
        let count = self.with_connection(|conn| {
            conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get::<_, i64>(0))
                .map_err(|err| StoreError::Query(format!("Failed to count sessions: {}", err)))
        })?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn rename(&self, id: &str, name: &str) -> Result<SessionRecord, StoreError> {
        self.update_and_fetch(id, "UPDATE sessions SET name = ?1 WHERE id = ?2", &[&name, &id])
    }

    fn set_notes(&self, id: &str, notes: Option<&str>) -> Result<SessionRecord, StoreError> {
        self.update_and_fetch(
            id,
            "UPDATE sessions SET notes = ?1 WHERE id = ?2",
            &[&notes, &id],
        )
    }

    fn set_location(
        &self,
        id: &str,
        latitude: f64,
        longitude: f64,
        name: Option<&str>,
    ) -> Result<SessionRecord, StoreError> {
        self.update_and_fetch(
            id,
            "UPDATE sessions SET latitude = ?1, longitude = ?2, location_name = ?3 WHERE id = ?4",
            &[&latitude, &longitude, &name, &id],
        )
    }

    fn set_error_counts(
        &self,
        id: &str,
        counts: &BTreeMap<String, u32>,
    ) -> Result<SessionRecord, StoreError> {
        let json = serde_json::to_string(counts).map_err(|err| {
            StoreError::StoreWriteFailed(format!("Failed to serialize error counts: {}", err))
        })?;
        self.update_and_fetch(
            id,
            "UPDATE sessions SET error_counts = ?1 WHERE id = ?2",
            &[&json, &id],
        )
    }
}

/// Column values as stored, before JSON/timestamp decoding.
struct RawRow {
    id: String,
    name: String,
    start_time: String,
    end_time: String,
    mistake_count: u32,
    mistake_timeline: String,
    notes: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    location_name: Option<String>,
    error_counts: Option<String>,
    dedup_key: String,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            start_time: row.get(2)?,
            end_time: row.get(3)?,
            mistake_count: row.get(4)?,
            mistake_timeline: row.get(5)?,
            notes: row.get(6)?,
            latitude: row.get(7)?,
            longitude: row.get(8)?,
            location_name: row.get(9)?,
            error_counts: row.get(10)?,
            dedup_key: row.get(11)?,
        })
    }

    fn into_record(self) -> Result<SessionRecord, StoreError> {
        let mistake_timeline = serde_json::from_str(&self.mistake_timeline).map_err(|err| {
            StoreError::Query(format!("Malformed timeline for session {}: {}", self.id, err))
        })?;
        let error_counts = self
            .error_counts
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|err| {
                StoreError::Query(format!("Malformed error counts for session {}: {}", self.id, err))
            })?;

        Ok(SessionRecord {
            start_time: parse_time(&self.id, &self.start_time)?,
            end_time: parse_time(&self.id, &self.end_time)?,
            id: self.id,
            name: self.name,
            mistake_count: self.mistake_count,
            mistake_timeline,
            notes: self.notes,
            latitude: self.latitude,
            longitude: self.longitude,
            location_name: self.location_name,
            error_counts,
            dedup_key: self.dedup_key,
        })
    }
}

fn fetch_one(
    conn: &Connection,
    column: &str,
    value: &str,
) -> Result<Option<SessionRecord>, StoreError> {
    let raw = conn
        .query_row(
            &format!("SELECT {} FROM sessions WHERE {} = ?1", SELECT_COLUMNS, column),
            [value],
            RawRow::from_row,
        )
        .optional()
        .map_err(|err| StoreError::Query(format!("Failed to query session: {}", err)))?;
    raw.map(RawRow::into_record).transpose()
}

/// Fixed-width UTC so lexical order matches chronological order.
fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_time(id: &str, value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| StoreError::Query(format!("Malformed timestamp for session {}: {}", id, err)))
}
