//! Boundary between the platform session object and the event loop.
//!
//! Platform callbacks arrive on arbitrary threads. They are converted to
//! [`LinkEvent`]s and posted through an [`EventSink`] into a bounded queue;
//! the runtime's single event-loop thread consumes them in order.

use std::sync::mpsc::{SyncSender, TrySendError};

use tally_protocol::codec::MessageKind;
use tally_protocol::Envelope;
use tracing::warn;

use super::state::Lifecycle;
use crate::error::LinkError;

/// Platform path an inbound envelope took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundChannel {
    /// Live message, delivered while the peer was reachable.
    Message,
    /// Queued background transfer, delivered whenever the platform gets to it.
    UserInfo,
}

impl InboundChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            InboundChannel::Message => "message",
            InboundChannel::UserInfo => "user_info",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Lifecycle(Lifecycle),
    Received {
        channel: InboundChannel,
        envelope: Envelope,
    },
    /// Asynchronous delivery failure for an earlier send.
    SendFailed {
        kind: MessageKind,
        reason: String,
    },
    /// Stops the event loop.
    Shutdown,
}

/// Posting half of the event queue, handed to the transport on attach.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: SyncSender<LinkEvent>,
}

impl EventSink {
    pub fn new(tx: SyncSender<LinkEvent>) -> Self {
        Self { tx }
    }

    /// Posts an event, waiting for room if the queue is full. Fails only
    /// once the event loop has exited.
    pub fn post(&self, event: LinkEvent) -> Result<(), LinkError> {
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(event)) => {
                warn!("Link event queue full; waiting for the event loop");
                self.tx
                    .send(event)
                    .map_err(|_| LinkError::EventLoopStopped)
            }
            Err(TrySendError::Disconnected(_)) => Err(LinkError::EventLoopStopped),
        }
    }
}

/// Platform point-to-point session.
pub trait Transport: Send + Sync {
    /// Registers where lifecycle and inbound events are posted. Called once,
    /// before [`Transport::activate`].
    fn attach(&self, sink: EventSink);

    /// Requests activation; completion arrives as a
    /// [`Lifecycle::ActivationCompleted`] event.
    ///
    /// The event loop itself calls this when reactivating after
    /// [`Lifecycle::Deactivated`]. Completion must therefore be posted from
    /// another thread: posting it synchronously would wait on the loop's own
    /// queue and deadlock once the queue is full.
    fn activate(&self);

    /// Hands an envelope to the platform. Never blocks; failures arrive later
    /// as [`LinkEvent::SendFailed`], posted from another thread for the same
    /// reason as activation completion.
    fn send(&self, kind: MessageKind, envelope: Envelope);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::sync_channel;

    #[test]
    fn post_reports_stopped_loop() {
        let (tx, rx) = sync_channel(1);
        let sink = EventSink::new(tx);
        sink.post(LinkEvent::Shutdown).expect("post");
        assert_eq!(rx.recv().expect("recv"), LinkEvent::Shutdown);

        drop(rx);
        assert_eq!(
            sink.post(LinkEvent::Shutdown),
            Err(LinkError::EventLoopStopped)
        );
    }
}
