//! Transport Link.
//!
//! [`Link`] owns the activation/reachability state for the device's single
//! peer session and gates outbound sends on it. Delivery is best-effort:
//! a refused send is reported to the caller and dropped, never queued.

pub mod loopback;
pub mod state;
pub mod transport;

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tally_protocol::codec::MessageKind;
use tally_protocol::{encode, Envelope, Payload, SessionPayload};
use tracing::{debug, info, warn};

use crate::error::LinkError;

pub use loopback::LoopbackTransport;
pub use state::{Activation, Followup, Lifecycle, LinkState};
pub use transport::{EventSink, InboundChannel, LinkEvent, Transport};

/// Which end of the pair this process runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Constrained device: sends only while the peer is reachable.
    Watch,
    #[default]
    Phone,
}

impl Role {
    pub fn requires_reachability(&self) -> bool {
        matches!(self, Role::Watch)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Watch => "watch",
            Role::Phone => "phone",
        }
    }
}

pub struct Link {
    role: Role,
    state: Mutex<LinkState>,
    transport: Arc<dyn Transport>,
}

impl Link {
    pub fn new(role: Role, transport: Arc<dyn Transport>) -> Self {
        Self {
            role,
            state: Mutex::new(LinkState::default()),
            transport,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> LinkState {
        *self.lock_state()
    }

    pub fn attach(&self, sink: EventSink) {
        self.transport.attach(sink);
    }

    /// Idempotent. Only the first call while inactive reaches the transport.
    pub fn activate(&self) {
        let should_activate = self.lock_state().begin_activation();
        if should_activate {
            debug!(role = self.role.as_str(), "Activating link");
            self.transport.activate();
        }
    }

    /// Applies a platform lifecycle callback. Returns what the caller must do
    /// next (the event loop reactivates on [`Followup::Reactivate`]).
    pub fn on_lifecycle(&self, event: &Lifecycle) -> Followup {
        let (before, after, followup) = {
            let mut state = self.lock_state();
            let before = *state;
            let followup = state.apply(event);
            (before, *state, followup)
        };

        match event {
            Lifecycle::ActivationCompleted {
                activated: false,
                error,
                ..
            } => warn!(error = ?error, "Link activation failed"),
            _ if before != after => info!(
                activation = ?after.activation,
                reachable = after.reachable,
                "Link state changed"
            ),
            _ => {}
        }
        followup
    }

    /// Hands an envelope to the transport if the current state allows it.
    pub fn send(&self, kind: MessageKind, envelope: Envelope) -> Result<(), LinkError> {
        let gate = self.lock_state().send_gate(self.role, kind);
        if let Err(err) = gate {
            warn!(error = %err, "Send refused");
            return Err(err);
        }
        debug!(kind = kind.as_str(), fields = envelope.len(), "Sending envelope");
        self.transport.send(kind, envelope);
        Ok(())
    }

    pub fn send_payload(&self, payload: &Payload) -> Result<(), LinkError> {
        self.send(payload.kind(), encode(payload))
    }

    pub fn send_note(&self, text: &str) -> Result<(), LinkError> {
        self.send_payload(&Payload::Note(text.to_string()))
    }

    pub fn send_counter(&self, value: u32) -> Result<(), LinkError> {
        self.send_payload(&Payload::Counter(value))
    }

    pub fn send_session(&self, session: &SessionPayload) -> Result<(), LinkError> {
        self.send_payload(&Payload::Session(session.clone()))
    }

    fn lock_state(&self) -> MutexGuard<'_, LinkState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("role", &self.role)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
