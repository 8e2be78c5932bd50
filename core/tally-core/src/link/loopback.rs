//! In-process transport pair.
//!
//! Two endpoints share one simulated radio. Used by the integration tests and
//! anywhere a real platform session is not available.
//!
//! Each endpoint owns a courier thread that posts its events in order. Calls
//! into the transport only enqueue, so they return even when an event loop's
//! queue is full.

use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use tally_protocol::codec::MessageKind;
use tally_protocol::Envelope;
use tracing::{debug, warn};

use super::state::Lifecycle;
use super::transport::{EventSink, InboundChannel, LinkEvent, Transport};

#[derive(Debug, Default)]
struct Wire {
    link_up: bool,
    sinks: [Option<EventSink>; 2],
    activated: [bool; 2],
    activations: [usize; 2],
    sends: [usize; 2],
}

type Delivery = (EventSink, LinkEvent);

#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    side: usize,
    wire: Arc<Mutex<Wire>>,
    courier: Sender<Delivery>,
}

impl LoopbackTransport {
    /// Returns two connected endpoints. The link starts up.
    pub fn pair() -> (Self, Self) {
        let wire = Arc::new(Mutex::new(Wire {
            link_up: true,
            ..Wire::default()
        }));
        (
            Self {
                side: 0,
                wire: wire.clone(),
                courier: spawn_courier(0),
            },
            Self {
                side: 1,
                wire,
                courier: spawn_courier(1),
            },
        )
    }

    /// Simulates the peer walking in or out of range. Activated endpoints get
    /// a reachability callback.
    pub fn set_link_up(&self, up: bool) {
        let sinks: Vec<EventSink> = {
            let mut wire = self.wire();
            wire.link_up = up;
            (0..2)
                .filter(|side| wire.activated[*side])
                .filter_map(|side| wire.sinks[side].clone())
                .collect()
        };
        for sink in sinks {
            self.deliver(
                sink,
                LinkEvent::Lifecycle(Lifecycle::ReachabilityChanged { reachable: up }),
            );
        }
    }

    /// Simulates the platform tearing the session down on this side.
    pub fn deactivate(&self) {
        let sink = {
            let mut wire = self.wire();
            wire.activated[self.side] = false;
            wire.sinks[self.side].clone()
        };
        if let Some(sink) = sink {
            self.deliver(sink, LinkEvent::Lifecycle(Lifecycle::Deactivated));
        }
    }

    /// Queues a background transfer to the peer. Delivered even when the
    /// link is down, as the platform would eventually do.
    pub fn transfer_user_info(&self, envelope: Envelope) {
        let peer = self.wire().sinks[1 - self.side].clone();
        if let Some(peer) = peer {
            self.deliver(
                peer,
                LinkEvent::Received {
                    channel: InboundChannel::UserInfo,
                    envelope,
                },
            );
        }
    }

    /// Number of times this endpoint was asked to activate.
    pub fn activations(&self) -> usize {
        self.wire().activations[self.side]
    }

    /// Number of envelopes this endpoint's [`Transport::send`] was handed.
    pub fn sends(&self) -> usize {
        self.wire().sends[self.side]
    }

    fn deliver(&self, sink: EventSink, event: LinkEvent) {
        if self.courier.send((sink, event)).is_err() {
            debug!(side = self.side, "Loopback courier gone; event dropped");
        }
    }

    fn wire(&self) -> MutexGuard<'_, Wire> {
        self.wire
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Transport for LoopbackTransport {
    fn attach(&self, sink: EventSink) {
        self.wire().sinks[self.side] = Some(sink);
    }

    fn activate(&self) {
        let (sink, reachable) = {
            let mut wire = self.wire();
            wire.activated[self.side] = true;
            wire.activations[self.side] += 1;
            (wire.sinks[self.side].clone(), wire.link_up)
        };
        if let Some(sink) = sink {
            self.deliver(
                sink,
                LinkEvent::Lifecycle(Lifecycle::ActivationCompleted {
                    activated: true,
                    reachable,
                    error: None,
                }),
            );
        }
    }

    fn send(&self, kind: MessageKind, envelope: Envelope) {
        let (own, peer, link_up) = {
            let mut wire = self.wire();
            wire.sends[self.side] += 1;
            (
                wire.sinks[self.side].clone(),
                wire.sinks[1 - self.side].clone(),
                wire.link_up,
            )
        };

        match peer {
            Some(peer) if link_up => self.deliver(
                peer,
                LinkEvent::Received {
                    channel: InboundChannel::Message,
                    envelope,
                },
            ),
            _ => {
                if let Some(own) = own {
                    self.deliver(
                        own,
                        LinkEvent::SendFailed {
                            kind,
                            reason: "peer is not reachable".to_string(),
                        },
                    );
                }
            }
        }
    }
}

/// Exits once every endpoint clone for this side is dropped.
fn spawn_courier(side: usize) -> Sender<Delivery> {
    let (tx, rx) = channel::<Delivery>();
    let spawned = thread::Builder::new()
        .name(format!("loopback-courier-{}", side))
        .spawn(move || {
            for (sink, event) in rx {
                if let Err(err) = sink.post(event) {
                    debug!(error = %err, "Loopback event dropped");
                }
            }
        });
    if let Err(err) = spawned {
        warn!(error = %err, side, "Failed to start loopback courier");
    }
    tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::sync_channel;
    use std::time::Duration;
    use tally_protocol::{encode, Payload};

    #[test]
    fn delivers_to_peer_while_up() {
        let (a, b) = LoopbackTransport::pair();
        let (tx_a, rx_a) = sync_channel(8);
        let (tx_b, rx_b) = sync_channel(8);
        a.attach(EventSink::new(tx_a));
        b.attach(EventSink::new(tx_b));

        let envelope = encode(&Payload::Note("hello".to_string()));
        a.send(MessageKind::Note, envelope.clone());
        assert_eq!(
            rx_b.recv_timeout(Duration::from_secs(1)).expect("delivered"),
            LinkEvent::Received {
                channel: InboundChannel::Message,
                envelope
            }
        );
        assert!(rx_a.try_recv().is_err());
        assert_eq!(a.sends(), 1);
        assert_eq!(b.sends(), 0);
    }

    #[test]
    fn reports_failure_while_down() {
        let (a, b) = LoopbackTransport::pair();
        let (tx_a, rx_a) = sync_channel(8);
        let (tx_b, rx_b) = sync_channel(8);
        a.attach(EventSink::new(tx_a));
        b.attach(EventSink::new(tx_b));
        a.set_link_up(false);

        a.send(MessageKind::Counter, encode(&Payload::Counter(1)));
        match rx_a.recv_timeout(Duration::from_secs(1)).expect("failure") {
            LinkEvent::SendFailed { kind, .. } => assert_eq!(kind, MessageKind::Counter),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn user_info_ignores_reachability() {
        let (a, b) = LoopbackTransport::pair();
        let (tx_b, rx_b) = sync_channel(8);
        b.attach(EventSink::new(tx_b));
        a.set_link_up(false);

        a.transfer_user_info(encode(&Payload::Counter(3)));
        match rx_b.recv_timeout(Duration::from_secs(1)).expect("delivered") {
            LinkEvent::Received { channel, .. } => assert_eq!(channel, InboundChannel::UserInfo),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn failed_send_returns_while_own_queue_is_full() {
        let (a, _b) = LoopbackTransport::pair();
        let (tx_a, rx_a) = sync_channel(1);
        a.attach(EventSink::new(tx_a.clone()));
        tx_a.send(LinkEvent::Shutdown).expect("fill queue");
        a.set_link_up(false);

        // Called from the thread that would drain the queue; must not wait.
        a.send(MessageKind::Note, encode(&Payload::Note("late".to_string())));
        a.send(MessageKind::Counter, encode(&Payload::Counter(2)));
        assert_eq!(a.sends(), 2);

        assert_eq!(
            rx_a.recv_timeout(Duration::from_secs(1)).expect("filler"),
            LinkEvent::Shutdown
        );
        let kinds: Vec<MessageKind> = (0..2)
            .map(|_| match rx_a.recv_timeout(Duration::from_secs(1)).expect("failure") {
                LinkEvent::SendFailed { kind, .. } => kind,
                other => panic!("unexpected event {:?}", other),
            })
            .collect();
        assert_eq!(kinds, vec![MessageKind::Note, MessageKind::Counter]);
    }

    #[test]
    fn activation_completes_asynchronously() {
        let (a, _b) = LoopbackTransport::pair();
        let (tx, rx) = sync_channel(8);
        a.attach(EventSink::new(tx));
        a.activate();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(1)).expect("completed"),
            LinkEvent::Lifecycle(Lifecycle::ActivationCompleted {
                activated: true,
                reachable: true,
                error: None
            })
        );
    }
}
