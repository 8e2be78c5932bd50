//! Reachability/activation state machine.
//!
//! ```text
//!   Inactive ──activate()──▶ Activating ──ActivationCompleted(ok)──▶ Activated
//!      ▲                          │                                     │
//!      └──── completed(err) ──────┘          BecameInactive/Deactivated ┘
//! ```
//!
//! While `Activated` the link is orthogonally `Reachable` or `Unreachable`.
//! Transitions happen only in response to platform callbacks; the one
//! exception is [`LinkState::begin_activation`], which is the local request.

use serde::Serialize;
use tally_protocol::codec::MessageKind;

use super::Role;
use crate::error::LinkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Inactive,
    Activating,
    Activated,
}

/// Platform lifecycle callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle {
    ActivationCompleted {
        activated: bool,
        reachable: bool,
        error: Option<String>,
    },
    ReachabilityChanged {
        reachable: bool,
    },
    BecameInactive,
    Deactivated,
}

/// What the owner of the state must do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Followup {
    None,
    Reactivate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LinkState {
    pub activation: Activation,
    pub reachable: bool,
}

impl LinkState {
    /// Returns true when the transport should actually be asked to activate.
    pub fn begin_activation(&mut self) -> bool {
        match self.activation {
            Activation::Inactive => {
                self.activation = Activation::Activating;
                true
            }
            Activation::Activating | Activation::Activated => false,
        }
    }

    pub fn apply(&mut self, event: &Lifecycle) -> Followup {
        match event {
            Lifecycle::ActivationCompleted {
                activated: true,
                reachable,
                ..
            } => {
                self.activation = Activation::Activated;
                self.reachable = *reachable;
                Followup::None
            }
            Lifecycle::ActivationCompleted {
                activated: false, ..
            } => {
                self.activation = Activation::Inactive;
                self.reachable = false;
                Followup::None
            }
            Lifecycle::ReachabilityChanged { reachable } => {
                self.reachable = *reachable;
                Followup::None
            }
            Lifecycle::BecameInactive => {
                self.activation = Activation::Inactive;
                self.reachable = false;
                Followup::None
            }
            Lifecycle::Deactivated => {
                self.activation = Activation::Inactive;
                self.reachable = false;
                Followup::Reactivate
            }
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.activation == Activation::Activated && self.reachable
    }

    /// Whether a message of `kind` may be handed to the transport right now.
    pub fn send_gate(&self, role: Role, kind: MessageKind) -> Result<(), LinkError> {
        if self.activation != Activation::Activated {
            return Err(LinkError::LinkNotActivated { kind });
        }
        if role.requires_reachability() && !self.reachable {
            return Err(LinkError::LinkUnreachable { kind });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activated(reachable: bool) -> LinkState {
        let mut state = LinkState::default();
        assert!(state.begin_activation());
        state.apply(&Lifecycle::ActivationCompleted {
            activated: true,
            reachable,
            error: None,
        });
        state
    }

    #[test]
    fn activation_is_idempotent() {
        let mut state = LinkState::default();
        assert!(state.begin_activation());
        assert!(!state.begin_activation());
        assert_eq!(state.activation, Activation::Activating);

        state.apply(&Lifecycle::ActivationCompleted {
            activated: true,
            reachable: false,
            error: None,
        });
        assert!(!state.begin_activation());
        assert_eq!(state.activation, Activation::Activated);
    }

    #[test]
    fn failed_activation_returns_to_inactive() {
        let mut state = LinkState::default();
        state.begin_activation();
        state.apply(&Lifecycle::ActivationCompleted {
            activated: false,
            reachable: false,
            error: Some("not paired".to_string()),
        });
        assert_eq!(state.activation, Activation::Inactive);
        assert!(state.begin_activation());
    }

    #[test]
    fn sends_before_activation_are_refused_on_both_roles() {
        let mut state = LinkState::default();
        for role in [Role::Watch, Role::Phone] {
            assert_eq!(
                state.send_gate(role, MessageKind::Session),
                Err(LinkError::LinkNotActivated {
                    kind: MessageKind::Session
                })
            );
        }
        state.begin_activation();
        assert!(state.send_gate(Role::Phone, MessageKind::Note).is_err());
    }

    #[test]
    fn watch_requires_reachability_phone_does_not() {
        let mut state = activated(false);
        assert_eq!(
            state.send_gate(Role::Watch, MessageKind::Counter),
            Err(LinkError::LinkUnreachable {
                kind: MessageKind::Counter
            })
        );
        assert_eq!(state.send_gate(Role::Phone, MessageKind::Counter), Ok(()));

        state.apply(&Lifecycle::ReachabilityChanged { reachable: true });
        assert_eq!(state.send_gate(Role::Watch, MessageKind::Counter), Ok(()));
        assert!(state.is_reachable());
    }

    #[test]
    fn deactivation_requests_reactivation() {
        let mut state = activated(true);
        assert_eq!(state.apply(&Lifecycle::Deactivated), Followup::Reactivate);
        assert_eq!(state.activation, Activation::Inactive);
        assert!(!state.reachable);
        assert!(state.begin_activation());
    }

    #[test]
    fn became_inactive_blocks_sends() {
        let mut state = activated(true);
        assert_eq!(state.apply(&Lifecycle::BecameInactive), Followup::None);
        assert!(state.send_gate(Role::Phone, MessageKind::Note).is_err());
    }
}
