//! Single-consumer event loop.
//!
//! All link events (lifecycle callbacks, inbound envelopes, async send
//! failures) are drained here in arrival order. State transitions, dispatch,
//! persistence and fan-out all happen on this one thread.

use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tally_protocol::{decode, Envelope, Payload};
use tracing::{debug, error, info, warn};

use crate::error::{Result, TallyError};
use crate::link::{Followup, InboundChannel, Link, LinkEvent};
use crate::mirror::{CounterState, CounterStore, MessageItem, MessageLog};
use crate::notify::{Notification, NotificationHub};
use crate::reconciler::{Reconciliation, SessionReconciler};
use crate::widgets::WidgetRefreshTrigger;

/// What an inbound envelope turned into.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    Session(Reconciliation),
    Counter(CounterState),
    Note(MessageItem),
}

/// Routes inbound envelopes by message kind.
pub struct Dispatcher {
    pub(crate) link: Arc<Link>,
    pub(crate) counter: Arc<CounterStore>,
    pub(crate) messages: Arc<MessageLog>,
    pub(crate) reconciler: Arc<SessionReconciler>,
    pub(crate) widgets: WidgetRefreshTrigger,
    pub(crate) hub: Arc<NotificationHub>,
}

impl Dispatcher {
    /// Handles one event. Returns false when the loop should stop.
    pub fn handle(&self, event: LinkEvent) -> bool {
        match event {
            LinkEvent::Lifecycle(lifecycle) => {
                if self.link.on_lifecycle(&lifecycle) == Followup::Reactivate {
                    info!("Link deactivated; reactivating");
                    self.link.activate();
                }
            }
            LinkEvent::Received { channel, envelope } => {
                if let Err(err) = self.dispatch(channel, &envelope) {
                    warn!(
                        channel = channel.as_str(),
                        error = %err,
                        "Dropping inbound envelope"
                    );
                }
            }
            LinkEvent::SendFailed { kind, reason } => {
                warn!(kind = kind.as_str(), reason = %reason, "Message delivery failed");
            }
            LinkEvent::Shutdown => return false,
        }
        true
    }

    /// Decodes an inbound envelope and applies it. Both inbound channels go
    /// through the same decode chain.
    pub fn dispatch(&self, channel: InboundChannel, envelope: &Envelope) -> Result<Dispatched> {
        let payload = decode(envelope)?;
        debug!(
            channel = channel.as_str(),
            kind = payload.kind().as_str(),
            "Inbound envelope"
        );

        match payload {
            Payload::Session(session) => {
                let outcome = self.reconciler.reconcile_payload(&session)?;
                Ok(Dispatched::Session(outcome))
            }
            Payload::Counter(value) => {
                let state = self.counter.apply_remote_count(value)?;
                self.hub.publish(Notification::CounterReceived(value));
                Ok(Dispatched::Counter(state))
            }
            Payload::Note(text) => {
                let item = self.messages.save(&text)?;
                self.widgets.notify_changed("message_received");
                self.hub.publish(Notification::MessageReceived(item.clone()));
                Ok(Dispatched::Note(item))
            }
        }
    }
}

/// Spawns the event-loop thread. It exits on [`LinkEvent::Shutdown`] or when
/// every sender is gone.
pub fn spawn_event_loop(
    dispatcher: Dispatcher,
    events: Receiver<LinkEvent>,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("tally-link".to_string())
        .spawn(move || run(dispatcher, events))
        .map_err(|source| TallyError::Io {
            context: "spawn event loop".to_string(),
            source,
        })
}

fn run(dispatcher: Dispatcher, events: Receiver<LinkEvent>) {
    debug!("Event loop started");
    loop {
        match events.recv() {
            Ok(event) => {
                if !dispatcher.handle(event) {
                    break;
                }
            }
            Err(_) => {
                error!("Event queue closed without shutdown");
                break;
            }
        }
    }
    debug!("Event loop stopped");
}
