//! ChannelFlushing transitions
//!
//! The machine sits here until the channel reports itself flushed. An offer
//! the remote party sends too early is stashed; when the flush lands, the
//! stash is replayed as an internal event so the remote never needs to
//! re-send. Otherwise, if we are the side driving this round, we emit our
//! own offer trigger.

use super::invalid_transition;
use crate::close::env::CloseEnv;
use crate::close::events::CloseEvent;
use crate::close::state::{ChannelFlushing, CloseState, ClosingNegotiation};
use crate::close::terms::CloseChannelTerms;
use crate::close::CloseTransition;
use crate::errors::{CloseError, Result};
use crate::fsm::{Emission, Transition};

pub(super) fn process_event(
    state: &ChannelFlushing,
    event: CloseEvent,
    _env: &CloseEnv,
) -> Result<CloseTransition> {
    match event {
        // The remote party finished flushing before we did; stash its offer
        // for replay once our own flush completes.
        CloseEvent::OfferReceived { msg } => {
            let next = ChannelFlushing {
                early_remote_offer: Some(msg),
                ..state.clone()
            };

            Ok(Transition {
                next_state: CloseState::ChannelFlushing(next),
                new_events: None,
            })
        }

        CloseEvent::ChannelFlushed {
            fresh_flush: _,
            balances,
        } => {
            let balances = balances.ok_or(CloseError::UnknownFinalBalance)?;

            let terms = CloseChannelTerms {
                balances,
                scripts: state.scripts.clone(),
            };
            let negotiation = ClosingNegotiation::new(terms);

            // A stashed early remote offer takes precedence; otherwise we
            // kick off our own offer when we drive this round.
            let internal = match state.early_remote_offer.clone() {
                Some(msg) => Some(CloseEvent::OfferReceived { msg }),
                None => state.ideal_fee_rate.map(|target_fee_rate| CloseEvent::SendOffer {
                    target_fee_rate,
                }),
            };

            Ok(Transition {
                next_state: CloseState::ClosingNegotiation(negotiation),
                new_events: internal.map(Emission::internal),
            })
        }

        event => Err(invalid_transition("channel_flushing", &event)),
    }
}
