//! Close protocol state transitions
//!
//! The per-state transition functions, mirrored one file per state-group.
//! Each function is pure: it consults the environment's collaborators,
//! validates the event, and returns the next state together with the
//! internal events and daemon effects to emit. All I/O beyond the channel
//! observer and signer is requested through daemon effects.

mod active;
mod flushing;
mod negotiation;
mod pending;
mod shutdown_pending;

use crate::close::env::CloseEnv;
use crate::close::events::CloseEvent;
use crate::close::state::CloseState;
use crate::close::CloseTransition;
use crate::errors::{CloseError, Error, Result};
use crate::fsm::State;

/// The error for an event the current state cannot route
pub(crate) fn invalid_transition(state: &'static str, event: &CloseEvent) -> Error {
    CloseError::InvalidStateTransition {
        state,
        event: event.name(),
    }
    .into()
}

impl State for CloseState {
    type Event = CloseEvent;
    type Env = CloseEnv;

    fn process_event(&self, event: CloseEvent, env: &CloseEnv) -> Result<CloseTransition> {
        match self {
            CloseState::ChannelActive(state) => active::process_event(state, event, env),
            CloseState::ShutdownPending(state) => {
                shutdown_pending::process_event(state, event, env)
            }
            CloseState::ChannelFlushing(state) => flushing::process_event(state, event, env),
            CloseState::ClosingNegotiation(state) => negotiation::process_event(state, event, env),
            CloseState::ClosePending(state) => pending::process_event(state, event, env),
            CloseState::CloseFin(_) => Err(invalid_transition("close_fin", &event)),
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, CloseState::CloseFin(_))
    }
}
