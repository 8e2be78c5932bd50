//! `TallyEngine`: the explicitly constructed sync service for one device.
//!
//! `start` wires the mirror, the session store, the link and the event loop
//! together and requests activation. Hold the engine for the lifetime of the
//! app and call [`TallyEngine::shutdown`] on exit.

use std::collections::BTreeMap;
use std::sync::mpsc::sync_channel;
use std::sync::Arc;
use std::thread::JoinHandle;

use tally_protocol::codec::Location;
use tally_protocol::SessionPayload;
use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::TallyConfig;
use crate::error::{LinkError, Result, TallyError};
use crate::link::{EventSink, Link, LinkEvent, LinkState, Role, Transport};
use crate::mirror::{open_region, CounterState, CounterStore, MessageLog};
use crate::notify::{EventName, NotificationHub, Subscription};
use crate::reconciler::SessionReconciler;
use crate::runtime::{spawn_event_loop, Dispatcher};
use crate::session::SessionRecord;
use crate::storage::StorageConfig;
use crate::store::{SessionStore, SqliteSessionStore};
use crate::widgets::{NoopScheduler, TimelineScheduler, WidgetRefreshTrigger};

pub struct EngineOptions {
    storage: StorageConfig,
    config: TallyConfig,
    transport: Arc<dyn Transport>,
    scheduler: Arc<dyn TimelineScheduler>,
    clock: Arc<dyn Clock>,
}

impl EngineOptions {
    pub fn new(storage: StorageConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            storage,
            config: TallyConfig::default(),
            transport,
            scheduler: Arc::new(NoopScheduler),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn config(mut self, config: TallyConfig) -> Self {
        self.config = config;
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn TimelineScheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Outcome of [`TallyEngine::submit_session`]. The local counter has been
/// reset whatever `delivery` says.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitReceipt {
    pub payload: SessionPayload,
    pub delivery: std::result::Result<(), LinkError>,
}

pub struct TallyEngine {
    role: Role,
    link: Arc<Link>,
    counter: Arc<CounterStore>,
    messages: Arc<MessageLog>,
    sessions: Arc<dyn SessionStore>,
    widgets: WidgetRefreshTrigger,
    hub: Arc<NotificationHub>,
    clock: Arc<dyn Clock>,
    sink: EventSink,
    event_loop: Option<JoinHandle<()>>,
}

impl TallyEngine {
    pub fn start(options: EngineOptions) -> Result<Self> {
        let EngineOptions {
            mut storage,
            config,
            transport,
            scheduler,
            clock,
        } = options;

        if let Some(dir) = &config.mirror.shared_region_dir {
            storage = storage.with_shared_dir(dir.clone());
        }

        let widgets = WidgetRefreshTrigger::new(scheduler);
        let hub = Arc::new(NotificationHub::new());
        let region = open_region(&storage.region_file());
        let counter = Arc::new(CounterStore::new(
            region.clone(),
            widgets.clone(),
            clock.clone(),
        ));
        let messages = Arc::new(MessageLog::new(region.clone(), clock.clone()));
        let sessions: Arc<dyn SessionStore> =
            Arc::new(SqliteSessionStore::new(storage.sessions_db())?);
        let reconciler = Arc::new(SessionReconciler::new(
            sessions.clone(),
            widgets.clone(),
            hub.clone(),
            config.naming.offset(),
        ));
        let link = Arc::new(Link::new(config.role, transport));

        let (tx, rx) = sync_channel(config.link.event_queue_capacity);
        let sink = EventSink::new(tx);
        link.attach(sink.clone());

        let dispatcher = Dispatcher {
            link: link.clone(),
            counter: counter.clone(),
            messages: messages.clone(),
            reconciler,
            widgets: widgets.clone(),
            hub: hub.clone(),
        };
        let event_loop = spawn_event_loop(dispatcher, rx)?;

        link.activate();
        info!(
            role = config.role.as_str(),
            shared_region = region.is_shared(),
            root = %storage.root().display(),
            "Tally engine started"
        );

        Ok(Self {
            role: config.role,
            link,
            counter,
            messages,
            sessions,
            widgets,
            hub,
            clock,
            sink,
            event_loop: Some(event_loop),
        })
    }

    /// Stops the event loop and waits for it to drain queued events.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.event_loop.take() else {
            return Ok(());
        };
        // A stopped loop has nothing left to drain.
        let _ = self.sink.post(LinkEvent::Shutdown);
        handle.join().map_err(|_| TallyError::Io {
            context: "join event loop".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "event loop panicked"),
        })?;
        info!("Tally engine stopped");
        Ok(())
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn link_state(&self) -> LinkState {
        self.link.state()
    }

    pub fn subscribe(&self, name: EventName) -> Subscription {
        self.hub.subscribe(name)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Counter
    // ─────────────────────────────────────────────────────────────────────

    pub fn counter(&self) -> Result<CounterState> {
        Ok(self.counter.snapshot()?)
    }

    pub fn increment(&self) -> Result<CounterState> {
        Ok(self.counter.increment()?)
    }

    pub fn decrement(&self) -> Result<CounterState> {
        Ok(self.counter.decrement()?)
    }

    pub fn reset(&self) -> Result<CounterState> {
        Ok(self.counter.reset()?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Outbound
    // ─────────────────────────────────────────────────────────────────────

    pub fn send_note(&self, text: &str) -> std::result::Result<(), LinkError> {
        self.link.send_note(text)
    }

    /// Sends the current counter value to the peer.
    pub fn send_counter(&self) -> Result<()> {
        let state = self.counter.snapshot()?;
        self.link.send_counter(state.value)?;
        Ok(())
    }

    /// Packages the current session, hands it to the link and starts a new
    /// session locally. Fire-and-forget: the reset happens even when the send
    /// is refused, and nothing is retried.
    ///
    /// A session with no mistakes is refused with [`TallyError::EmptySession`]
    /// before anything is sent or reset.
    pub fn submit_session(
        &self,
        notes: Option<String>,
        location: Option<Location>,
        location_name: Option<String>,
    ) -> Result<SubmitReceipt> {
        let state = self.counter.snapshot()?;
        if state.value == 0 {
            return Err(TallyError::EmptySession);
        }
        let mut payload = SessionPayload::new(
            state.session_start_time,
            self.clock.now(),
            state.mistake_timeline,
        );
        payload.notes = notes;
        payload.location = location;
        payload.location_name = location_name;

        let delivery = self.link.send_session(&payload);
        match &delivery {
            Ok(()) => info!(mistakes = payload.mistake_count, "Session submitted"),
            Err(err) => warn!(error = %err, "Session submitted locally but not sent"),
        }

        self.counter.reset()?;
        Ok(SubmitReceipt { payload, delivery })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Received data
    // ─────────────────────────────────────────────────────────────────────

    pub fn messages(&self) -> &MessageLog {
        &self.messages
    }

    pub fn sessions(&self) -> &dyn SessionStore {
        self.sessions.as_ref()
    }

    pub fn recent_sessions(&self, limit: usize) -> Result<Vec<SessionRecord>> {
        Ok(self.sessions.list_recent(limit)?)
    }

    pub fn rename_session(&self, id: &str, name: &str) -> Result<SessionRecord> {
        let record = self.sessions.rename(id, name)?;
        self.widgets.notify_changed("session_renamed");
        Ok(record)
    }

    pub fn set_session_notes(&self, id: &str, notes: Option<&str>) -> Result<SessionRecord> {
        let record = self.sessions.set_notes(id, notes)?;
        self.widgets.notify_changed("session_notes");
        Ok(record)
    }

    pub fn set_session_location(
        &self,
        id: &str,
        location: Location,
        name: Option<&str>,
    ) -> Result<SessionRecord> {
        let record =
            self.sessions
                .set_location(id, location.latitude, location.longitude, name)?;
        self.widgets.notify_changed("session_location");
        Ok(record)
    }

    pub fn categorize_session(
        &self,
        id: &str,
        counts: &BTreeMap<String, u32>,
    ) -> Result<SessionRecord> {
        let record = self.sessions.set_error_counts(id, counts)?;
        self.widgets.notify_changed("session_categorized");
        Ok(record)
    }
}

impl Drop for TallyEngine {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!(error = %err, "Tally engine did not stop cleanly");
        }
    }
}

impl std::fmt::Debug for TallyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TallyEngine")
            .field("role", &self.role)
            .field("link", &self.link.state())
            .finish_non_exhaustive()
    }
}
