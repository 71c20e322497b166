//! ClosePending transitions
//!
//! A broadcast close transaction is pending confirmation. The funding spend
//! confirming moves the machine to its terminal state. Until then, either
//! side may start a fresh RBF iteration: our own `SendShutdown` at a
//! strictly higher fee rate, or a remote offer paying strictly more than the
//! pending transaction, both route back through `ChannelFlushing`.

use super::invalid_transition;
use crate::close::env::CloseEnv;
use crate::close::events::CloseEvent;
use crate::close::state::{ChannelFlushing, ClosePending, CloseFin, CloseState};
use crate::close::CloseTransition;
use crate::errors::{CloseError, Result};
use crate::fsm::{Emission, Transition};

pub(super) fn process_event(
    state: &ClosePending,
    event: CloseEvent,
    env: &CloseEnv,
) -> Result<CloseTransition> {
    match event {
        // The funding outpoint was spent and confirmed: the close is final.
        CloseEvent::Spend { tx, .. } => Ok(Transition {
            next_state: CloseState::CloseFin(CloseFin { confirmed_tx: tx }),
            new_events: None,
        }),

        // A fresh local close request starts another RBF iteration, but
        // only at a strictly higher fee rate.
        CloseEvent::SendShutdown { ideal_fee_rate, .. } => {
            if ideal_fee_rate <= state.fee_rate {
                return Err(CloseError::FeeRateTooLow {
                    proposed: ideal_fee_rate.to_sat_per_vb_ceil(),
                    current: state.fee_rate.to_sat_per_vb_ceil(),
                }
                .into());
            }

            reflush(state, env, Some(ideal_fee_rate), None)
        }

        // The remote party opened a fresh iteration; its offer is stashed
        // and replayed once the re-flush lands.
        CloseEvent::OfferReceived { msg } => {
            if msg.fee_satoshis <= state.proposed_fee {
                return Err(CloseError::FeeOfferTooLow {
                    offered: msg.fee_satoshis.to_sat(),
                    pending: state.proposed_fee.to_sat(),
                }
                .into());
            }

            reflush(state, env, None, Some(msg))
        }

        event => Err(invalid_transition("close_pending", &event)),
    }
}

/// Route back to `ChannelFlushing` for an RBF iteration
///
/// The delivery scripts are fixed after the first round; the channel is
/// typically already flushed, so the fast path re-emits `ChannelFlushed`
/// immediately.
fn reflush(
    state: &ClosePending,
    env: &CloseEnv,
    ideal_fee_rate: Option<bitcoin::FeeRate>,
    early_remote_offer: Option<crate::wire::ClosingComplete>,
) -> Result<CloseTransition> {
    let flushing = ChannelFlushing {
        scripts: state.terms.scripts.clone(),
        ideal_fee_rate,
        early_remote_offer,
    };

    let internal = env
        .chan_observer
        .final_balances()
        .map(|balances| CloseEvent::ChannelFlushed {
            fresh_flush: false,
            balances: Some(balances),
        });

    Ok(Transition {
        next_state: CloseState::ChannelFlushing(flushing),
        new_events: internal.map(Emission::internal),
    })
}
