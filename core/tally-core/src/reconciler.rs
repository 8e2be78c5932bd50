//! Session Reconciler: inbound session envelope to durable record.

use std::sync::Arc;

use chrono::FixedOffset;
use tally_protocol::{decode, Envelope, Payload, SessionPayload};
use tracing::{info, warn};

use crate::error::ReconcileError;
use crate::notify::{Notification, NotificationHub};
use crate::session::SessionRecord;
use crate::store::{InsertOutcome, SessionStore};
use crate::widgets::WidgetRefreshTrigger;

/// Result of reconciling one envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    Inserted(SessionRecord),
    /// Redelivery of a session already stored. No write, no notification.
    Duplicate(SessionRecord),
}

impl Reconciliation {
    pub fn record(&self) -> &SessionRecord {
        match self {
            Reconciliation::Inserted(record) | Reconciliation::Duplicate(record) => record,
        }
    }
}

pub struct SessionReconciler {
    store: Arc<dyn SessionStore>,
    widgets: WidgetRefreshTrigger,
    hub: Arc<NotificationHub>,
    naming_offset: Option<FixedOffset>,
}

impl SessionReconciler {
    pub fn new(
        store: Arc<dyn SessionStore>,
        widgets: WidgetRefreshTrigger,
        hub: Arc<NotificationHub>,
        naming_offset: Option<FixedOffset>,
    ) -> Self {
        Self {
            store,
            widgets,
            hub,
            naming_offset,
        }
    }

    /// Decodes and persists a session envelope. Malformed input writes
    /// nothing.
    pub fn reconcile(&self, envelope: &Envelope) -> Result<Reconciliation, ReconcileError> {
        match decode(envelope)? {
            Payload::Session(session) => self.reconcile_payload(&session),
            other => Err(ReconcileError::NotASession(other.kind())),
        }
    }

    pub fn reconcile_payload(
        &self,
        session: &SessionPayload,
    ) -> Result<Reconciliation, ReconcileError> {
        if session.timeline_mismatch() {
            warn!(
                mistake_count = session.mistake_count,
                timeline_len = session.mistake_timeline.len(),
                "Session timeline length disagrees with mistake count; storing as sent"
            );
        }

        let record = SessionRecord::from_payload(session, self.naming_offset);
        match self.store.insert(&record)? {
            InsertOutcome::Inserted(record) => {
                info!(
                    id = %record.id,
                    name = %record.name,
                    mistakes = record.mistake_count,
                    "Session stored"
                );
                self.widgets.notify_changed("session_stored");
                self.hub
                    .publish(Notification::SessionReceived(record.clone()));
                Ok(Reconciliation::Inserted(record))
            }
            InsertOutcome::Duplicate(existing) => {
                info!(id = %existing.id, "Duplicate session delivery ignored");
                Ok(Reconciliation::Duplicate(existing))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::mirror::counter::tests::CountingScheduler;
    use crate::notify::EventName;
    use crate::store::SqliteSessionStore;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::collections::BTreeMap;
    use std::sync::atomic::Ordering;
    use tally_protocol::{encode, keys, DecodeError};

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<SqliteSessionStore>,
        scheduler: Arc<CountingScheduler>,
        hub: Arc<NotificationHub>,
        reconciler: SessionReconciler,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = Arc::new(
            SqliteSessionStore::new(dir.path().join("sessions.db")).expect("open store"),
        );
        let scheduler = Arc::new(CountingScheduler::default());
        let hub = Arc::new(NotificationHub::new());
        let reconciler = SessionReconciler::new(
            store.clone(),
            WidgetRefreshTrigger::new(scheduler.clone()),
            hub.clone(),
            FixedOffset::east_opt(0),
        );
        Fixture {
            _dir: dir,
            store,
            scheduler,
            hub,
            reconciler,
        }
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 2, hour, 0, 0)
            .single()
            .expect("valid time")
    }

    fn session_at(hour: u32, mistakes: u32) -> SessionPayload {
        let timeline = (0..mistakes)
            .map(|i| at(hour) + Duration::seconds(i64::from(i)))
            .collect();
        SessionPayload::new(at(hour), at(hour) + Duration::minutes(45), timeline)
    }

    #[test]
    fn unnamed_sessions_are_named_by_start_hour() {
        let f = fixture();
        for (hour, expected) in [
            (9, "Morning Practice"),
            (14, "Afternoon Practice"),
            (19, "Evening Practice"),
            (2, "Practice Session"),
        ] {
            let envelope = encode(&Payload::Session(session_at(hour, 1)));
            let result = f.reconciler.reconcile(&envelope).expect("reconcile");
            assert_eq!(result.record().name, expected, "hour {}", hour);
        }
        assert_eq!(f.store.count().expect("count"), 4);
    }

    #[test]
    fn missing_fields_write_nothing() {
        let f = fixture();
        let sessions = f.hub.subscribe(EventName::SessionReceived);
        let envelope = Envelope::builder().field(keys::TYPE, "session").build();

        let err = f.reconciler.reconcile(&envelope).expect_err("must fail");
        assert!(matches!(
            err,
            ReconcileError::Decode(DecodeError::MissingRequiredField(_))
        ));
        assert_eq!(f.store.count().expect("count"), 0);
        assert_eq!(f.scheduler.reloads.load(Ordering::SeqCst), 0);
        assert_eq!(sessions.try_recv(), None);
    }

    #[test]
    fn non_session_envelope_is_rejected() {
        let f = fixture();
        let err = f
            .reconciler
            .reconcile(&encode(&Payload::Counter(2)))
            .expect_err("must fail");
        assert!(matches!(err, ReconcileError::NotASession(_)));
    }

    #[test]
    fn redelivery_is_deduplicated() {
        let f = fixture();
        let sessions = f.hub.subscribe(EventName::SessionReceived);
        let envelope = encode(&Payload::Session(session_at(9, 5)));

        let first = f.reconciler.reconcile(&envelope).expect("first");
        let second = f.reconciler.reconcile(&envelope).expect("second");

        assert!(matches!(first, Reconciliation::Inserted(_)));
        assert_eq!(second, Reconciliation::Duplicate(first.record().clone()));
        assert_eq!(f.store.count().expect("count"), 1);
        assert!(sessions.try_recv().is_some());
        assert_eq!(sessions.try_recv(), None);
        assert_eq!(f.scheduler.reloads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn mismatched_timeline_is_stored_as_sent() {
        let f = fixture();
        let mut session = session_at(14, 2);
        session.mistake_count = 3;
        let result = f
            .reconciler
            .reconcile_payload(&session)
            .expect("reconcile");
        assert_eq!(result.record().mistake_count, 3);
        assert_eq!(result.record().mistake_timeline.len(), 2);
    }

    #[test]
    fn optional_fields_survive_to_the_record() {
        let f = fixture();
        let mut session = session_at(9, 1);
        session.session_name = Some("League night".to_string());
        session.notes = Some("served well".to_string());
        session.location_name = Some("Court 3".to_string());
        let mut counts = BTreeMap::new();
        counts.insert("Serve Error".to_string(), 1);
        session.error_counts = Some(counts.clone());

        let record = f
            .reconciler
            .reconcile(&encode(&Payload::Session(session)))
            .expect("reconcile")
            .record()
            .clone();
        let stored = f.store.get(&record.id).expect("get").expect("present");
        assert_eq!(stored.name, "League night");
        assert_eq!(stored.notes.as_deref(), Some("served well"));
        assert_eq!(stored.location_name.as_deref(), Some("Court 3"));
        assert_eq!(stored.error_counts, Some(counts));
    }

    struct FailingStore;

    impl SessionStore for FailingStore {
        fn insert(&self, _: &SessionRecord) -> Result<InsertOutcome, StoreError> {
            Err(StoreError::StoreWriteFailed("disk full".to_string()))
        }
        fn get(&self, _: &str) -> Result<Option<SessionRecord>, StoreError> {
            Ok(None)
        }
        fn list_recent(&self, _: usize) -> Result<Vec<SessionRecord>, StoreError> {
            Ok(Vec::new())
        }
        fn count(&self) -> Result<usize, StoreError> {
            Ok(0)
        }
        fn rename(&self, id: &str, _: &str) -> Result<SessionRecord, StoreError> {
            Err(StoreError::NotFound(id.to_string()))
        }
        fn set_notes(&self, id: &str, _: Option<&str>) -> Result<SessionRecord, StoreError> {
            Err(StoreError::NotFound(id.to_string()))
        }
        fn set_location(
            &self,
            id: &str,
            _: f64,
            _: f64,
            _: Option<&str>,
        ) -> Result<SessionRecord, StoreError> {
            Err(StoreError::NotFound(id.to_string()))
        }
        fn set_error_counts(
            &self,
            id: &str,
            _: &BTreeMap<String, u32>,
        ) -> Result<SessionRecord, StoreError> {
            Err(StoreError::NotFound(id.to_string()))
        }
    }

    #[test]
    fn store_failure_is_reported_without_notification() {
        let hub = Arc::new(NotificationHub::new());
        let sessions = hub.subscribe(EventName::SessionReceived);
        let reconciler = SessionReconciler::new(
            Arc::new(FailingStore),
            WidgetRefreshTrigger::noop(),
            hub,
            None,
        );
        let err = reconciler
            .reconcile(&encode(&Payload::Session(session_at(9, 0))))
            .expect_err("must fail");
        assert!(matches!(
            err,
            ReconcileError::Store(StoreError::StoreWriteFailed(_))
        ));
        assert_eq!(sessions.try_recv(), None);
    }
}
