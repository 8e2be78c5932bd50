use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use tally_core::mirror::open_region;
use tally_core::{
    CounterState, CounterStore, MessageLog, NotificationHub, Reconciliation, SessionReconciler,
    SessionStore, SqliteSessionStore, StorageConfig, SystemClock, TallyConfig, TallyError,
    WidgetRefreshTrigger,
};
use tally_protocol::Envelope;

use crate::CounterAction;

type Result<T> = std::result::Result<T, TallyError>;

fn io_err(context: &str) -> impl FnOnce(std::io::Error) -> TallyError + '_ {
    move |source| TallyError::Io {
        context: context.to_string(),
        source,
    }
}

pub fn counter(storage: &StorageConfig, action: CounterAction, out: &mut impl Write) -> Result<()> {
    let store = CounterStore::new(
        open_region(&storage.region_file()),
        WidgetRefreshTrigger::noop(),
        Arc::new(SystemClock),
    );
    let state = match action {
        CounterAction::Show => store.snapshot()?,
        CounterAction::Increment => store.increment()?,
        CounterAction::Decrement => store.decrement()?,
        CounterAction::Reset => store.reset()?,
    };
    print_counter(&state, store.is_shared(), out)
}

fn print_counter(state: &CounterState, shared: bool, out: &mut impl Write) -> Result<()> {
    writeln!(out, "mistakes:      {}", state.value).map_err(io_err("write output"))?;
    writeln!(out, "session start: {}", state.session_start_time.to_rfc3339())
        .map_err(io_err("write output"))?;
    if let Some(last) = state.mistake_timeline.last() {
        writeln!(out, "last mistake:  {}", last.to_rfc3339()).map_err(io_err("write output"))?;
    }
    if !shared {
        writeln!(out, "(shared region unavailable; showing process-local state)")
            .map_err(io_err("write output"))?;
    }
    Ok(())
}

pub fn sessions(
    storage: &StorageConfig,
    limit: usize,
    json: bool,
    out: &mut impl Write,
) -> Result<()> {
    let store = SqliteSessionStore::new(storage.sessions_db())?;
    let records = store.list_recent(limit)?;

    if json {
        for record in &records {
            let line = serde_json::to_string(record).map_err(|err| TallyError::Io {
                context: "serialize session".to_string(),
                source: err.into(),
            })?;
            writeln!(out, "{}", line).map_err(io_err("write output"))?;
        }
        return Ok(());
    }

    if records.is_empty() {
        writeln!(out, "No sessions stored.").map_err(io_err("write output"))?;
        return Ok(());
    }
    for record in &records {
        writeln!(
            out,
            "{}  {:<20}  {:>3} mistakes  {:>5.1}/h  {}",
            record.start_time.format("%Y-%m-%d %H:%M"),
            record.name,
            record.mistake_count,
            record.mistakes_per_hour(),
            record.id
        )
        .map_err(io_err("write output"))?;
    }
    Ok(())
}

pub fn ingest(
    storage: &StorageConfig,
    config: &TallyConfig,
    file: &Path,
    out: &mut impl Write,
) -> Result<()> {
    let bytes = fs_err::read(file).map_err(io_err("read envelope file"))?;
    let envelope = Envelope::from_json_slice(&bytes)?;

    let store = Arc::new(SqliteSessionStore::new(storage.sessions_db())?);
    let reconciler = SessionReconciler::new(
        store,
        WidgetRefreshTrigger::noop(),
        Arc::new(NotificationHub::new()),
        config.naming.offset(),
    );

    let written = match reconciler.reconcile(&envelope)? {
        Reconciliation::Inserted(record) => {
            writeln!(out, "stored {} \"{}\"", record.id, record.name)
        }
        Reconciliation::Duplicate(record) => {
            writeln!(out, "duplicate of {} \"{}\"", record.id, record.name)
        }
    };
    written.map_err(io_err("write output"))
}

pub fn messages(storage: &StorageConfig, clear: bool, out: &mut impl Write) -> Result<()> {
    let log = MessageLog::new(open_region(&storage.region_file()), Arc::new(SystemClock));

    if clear {
        log.clear()?;
        writeln!(out, "Cleared saved messages.").map_err(io_err("write output"))?;
        return Ok(());
    }

    let items = log.list()?;
    if items.is_empty() {
        writeln!(out, "No saved messages.").map_err(io_err("write output"))?;
    }
    for item in items {
        writeln!(
            out,
            "{}  {}",
            item.timestamp.format("%Y-%m-%d %H:%M:%S"),
            item.text
        )
        .map_err(io_err("write output"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> (tempfile::TempDir, StorageConfig) {
        let dir = tempfile::tempdir().expect("temp dir");
        let storage = StorageConfig::with_root(dir.path().to_path_buf());
        (dir, storage)
    }

    fn run(f: impl FnOnce(&mut Vec<u8>) -> Result<()>) -> String {
        let mut out = Vec::new();
        f(&mut out).expect("command");
        String::from_utf8(out).expect("utf8")
    }

    #[test]
    fn counter_persists_between_invocations() {
        let (_dir, storage) = storage();
        run(|out| counter(&storage, CounterAction::Increment, out));
        run(|out| counter(&storage, CounterAction::Increment, out));
        let shown = run(|out| counter(&storage, CounterAction::Show, out));
        assert!(shown.contains("mistakes:      2"), "{}", shown);

        let reset = run(|out| counter(&storage, CounterAction::Reset, out));
        assert!(reset.contains("mistakes:      0"), "{}", reset);
    }

    #[test]
    fn ingest_accepts_string_timestamps_and_dedups() {
        let (dir, storage) = storage();
        let file = dir.path().join("session.json");
        fs_err::write(
            &file,
            r#"{
                "type": "session",
                "startTime": "2026-03-01T09:00:00Z",
                "endTime": "2026-03-01T10:00:00Z",
                "mistakeCount": 2,
                "mistakeTimeline": ["2026-03-01T09:10:00Z", "2026-03-01T09:40:00Z"]
            }"#,
        )
        .expect("write envelope");
        let config = TallyConfig::default();

        let first = run(|out| ingest(&storage, &config, &file, out));
        assert!(first.starts_with("stored "), "{}", first);
        let second = run(|out| ingest(&storage, &config, &file, out));
        assert!(second.starts_with("duplicate of "), "{}", second);

        let listed = run(|out| sessions(&storage, 10, true, out));
        assert_eq!(listed.lines().count(), 1);
    }

    #[test]
    fn ingest_rejects_incomplete_session() {
        let (dir, storage) = storage();
        let file = dir.path().join("bad.json");
        fs_err::write(&file, r#"{"type": "session"}"#).expect("write envelope");

        let mut out = Vec::new();
        let err = ingest(&storage, &TallyConfig::default(), &file, &mut out)
            .expect_err("must fail");
        assert!(matches!(err, TallyError::Reconcile(_)));
        let listed = run(|out| sessions(&storage, 10, false, out));
        assert_eq!(listed.trim(), "No sessions stored.");
    }

    #[test]
    fn messages_lists_and_clears() {
        let (_dir, storage) = storage();
        let log = MessageLog::new(open_region(&storage.region_file()), Arc::new(SystemClock));
        log.save("good serve").expect("save");

        let listed = run(|out| messages(&storage, false, out));
        assert!(listed.contains("good serve"), "{}", listed);

        run(|out| messages(&storage, true, out));
        let empty = run(|out| messages(&storage, false, out));
        assert_eq!(empty.trim(), "No saved messages.");
    }
}
