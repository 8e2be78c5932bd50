//! In-process notification fan-out.
//!
//! Observers subscribe to an [`EventName`] and receive every later publish on
//! their own channel. Publishing happens only from the event loop, so
//! notifications for one subscriber arrive in dispatch order. There is no
//! replay: a subscriber sees only what is published after it subscribed.

use std::collections::HashMap;
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tracing::trace;

use crate::mirror::MessageItem;
use crate::session::SessionRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventName {
    #[serde(rename = "message-received")]
    MessageReceived,
    #[serde(rename = "counter-received")]
    CounterReceived,
    #[serde(rename = "session-received")]
    SessionReceived,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::MessageReceived => "message-received",
            EventName::CounterReceived => "counter-received",
            EventName::SessionReceived => "session-received",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum Notification {
    MessageReceived(MessageItem),
    CounterReceived(u32),
    SessionReceived(SessionRecord),
}

impl Notification {
    pub fn name(&self) -> EventName {
        match self {
            Notification::MessageReceived(_) => EventName::MessageReceived,
            Notification::CounterReceived(_) => EventName::CounterReceived,
            Notification::SessionReceived(_) => EventName::SessionReceived,
        }
    }
}

#[derive(Debug)]
pub struct Subscription {
    name: EventName,
    rx: Receiver<Notification>,
}

impl Subscription {
    pub fn name(&self) -> EventName {
        self.name
    }

    pub fn try_recv(&self) -> Option<Notification> {
        self.rx.try_recv().ok()
    }

    /// Waits up to `timeout`. `None` on timeout or once the hub is gone.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Notification> {
        match self.rx.recv_timeout(timeout) {
            Ok(notification) => Some(notification),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct NotificationHub {
    subscribers: Mutex<HashMap<EventName, Vec<Sender<Notification>>>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, name: EventName) -> Subscription {
        let (tx, rx) = channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(name)
            .or_default()
            .push(tx);
        Subscription { name, rx }
    }

    /// Delivers to every live subscriber of the notification's event name and
    /// drops subscribers whose receiving end is gone. Returns the number of
    /// subscribers reached.
    pub fn publish(&self, notification: Notification) -> usize {
        let name = notification.name();
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(senders) = subscribers.get_mut(&name) else {
            return 0;
        };
        senders.retain(|tx| tx.send(notification.clone()).is_ok());
        trace!(event = name.as_str(), delivered = senders.len(), "Published");
        senders.len()
    }
}
