//! ClosingNegotiation transitions
//!
//! Events entering the negotiation super-state are routed to whichever
//! sub-state claims them, remote side first for incoming offers, local side
//! first for our own offer and signature events. The local half prices and
//! sends our offer, then completes on the remote countersignature; the
//! remote half validates and countersigns an incoming offer. Either path
//! concludes in `ClosePending` with the signed transaction broadcast.

use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::{Amount, FeeRate, Sequence, Transaction};

use super::invalid_transition;
use crate::close::env::CloseEnv;
use crate::close::events::CloseEvent;
use crate::close::state::{
    ClosePending, CloseState, ClosingNegotiation, DualPeerState, LocalOfferSent, LocalPeerState,
};
use crate::close::CloseTransition;
use crate::errors::{CloseError, Result};
use crate::fsm::{DaemonEffect, Emission, SendMsgEffect, Transition};
use crate::wire::{self, SigVariant};

pub(super) fn process_event(
    state: &ClosingNegotiation,
    event: CloseEvent,
    env: &CloseEnv,
) -> Result<CloseTransition> {
    // Remote-first for offer events, local-first for our own sig events.
    if state.peer_state.remote.should_route_to(&event) {
        return process_remote(state, event, env);
    }
    if state.peer_state.local.should_route_to(&event) {
        return process_local(state, event, env);
    }

    Err(invalid_transition("closing_negotiation", &event))
}

/// Validate the signature set of an incoming message against the expected
/// variant, yielding the single carried signature
fn expect_single_sig(
    num_sigs: usize,
    sig: Option<(SigVariant, Signature)>,
    expected: SigVariant,
) -> Result<Signature> {
    if num_sigs > 1 {
        return Err(CloseError::TooManySigs { received: num_sigs }.into());
    }

    match sig {
        Some((variant, sig)) if variant == expected => Ok(sig),
        _ => Err(match expected {
            SigVariant::CloserNoClosee => CloseError::CloserNoClosee,
            SigVariant::CloserAndClosee => CloseError::CloserAndClosee,
        }
        .into()),
    }
}

/// The broadcast label attached to the close transaction
fn broadcast_label(env: &CloseEnv) -> String {
    format!("coop-close:{}", env.chan_point)
}

/// The fee rate a transaction pays with the given absolute fee
fn implied_fee_rate(fee: Amount, tx: &Transaction) -> FeeRate {
    let vsize = (tx.vsize() as u64).max(1);
    FeeRate::from_sat_per_vb_unchecked(fee.to_sat() / vsize)
}

/// Drive the local half-protocol: price and send our offer, or complete on
/// the remote countersignature
fn process_local(
    state: &ClosingNegotiation,
    event: CloseEvent,
    env: &CloseEnv,
) -> Result<CloseTransition> {
    match (&state.peer_state.local, event) {
        (LocalPeerState::CloseStart(local), CloseEvent::SendOffer { target_fee_rate }) => {
            let terms = &local.terms;
            let (local_txout, remote_txout) = terms.derive_close_txouts();

            let mut absolute_fee = env.fee_estimator.estimate_fee(
                env.chan_type,
                local_txout.as_ref(),
                remote_txout.as_ref(),
                target_fee_rate,
            );

            // We pay the fee from our settled balance; cap it at what we
            // actually have.
            if !terms.local_can_pay_fees(absolute_fee) {
                absolute_fee = terms.balances.local_balance;
            }

            let (local_sig, _closing_txid, _our_balance) = env.close_signer.create_close_proposal(
                absolute_fee,
                &terms.scripts.local_delivery_script,
                &terms.scripts.remote_delivery_script,
            )?;

            let remote_is_dust = terms.remote_amt_is_dust();
            let offer = wire::ClosingComplete {
                channel_id: env.chan_id,
                fee_satoshis: absolute_fee,
                sequence: Sequence::MAX,
                closer_no_closee: remote_is_dust.then_some(local_sig),
                closer_and_closee: (!remote_is_dust).then_some(local_sig),
            };

            let next = ClosingNegotiation {
                peer_state: DualPeerState {
                    local: LocalPeerState::OfferSent(LocalOfferSent {
                        terms: terms.clone(),
                        proposed_fee: absolute_fee,
                        proposed_fee_rate: target_fee_rate,
                        local_sig,
                    }),
                    remote: state.peer_state.remote.clone(),
                },
            };

            let effect = DaemonEffect::SendMsg(SendMsgEffect {
                target_peer: env.chan_peer,
                msgs: vec![wire::Message::ClosingComplete(offer)],
                send_when: None,
                post_send: None,
            });

            Ok(Transition {
                next_state: CloseState::ClosingNegotiation(next),
                new_events: Some(Emission::external(vec![effect])),
            })
        }

        (LocalPeerState::OfferSent(offer), CloseEvent::LocalSigReceived { msg }) => {
            let terms = &offer.terms;

            // The countersignature must match the version we offered: no
            // closee output when the remote balance is dust.
            let expected = if terms.remote_amt_is_dust() {
                SigVariant::CloserNoClosee
            } else {
                SigVariant::CloserAndClosee
            };
            let remote_sig = expect_single_sig(msg.num_sigs(), msg.signature(), expected)?;

            let (tx, _our_balance) = env.close_signer.complete_cooperative_close(
                &offer.local_sig,
                &remote_sig,
                &terms.scripts.local_delivery_script,
                &terms.scripts.remote_delivery_script,
                offer.proposed_fee,
            )?;

            env.chan_observer.mark_coop_broadcasted(&tx, true)?;

            let pending = ClosePending {
                close_tx: tx.clone(),
                proposed_fee: offer.proposed_fee,
                fee_rate: offer.proposed_fee_rate,
                terms: terms.clone(),
            };

            let effect = DaemonEffect::BroadcastTxn {
                tx,
                label: broadcast_label(env),
            };

            Ok(Transition {
                next_state: CloseState::ClosePending(pending),
                new_events: Some(Emission::external(vec![effect])),
            })
        }

        (_, event) => Err(invalid_transition("closing_negotiation", &event)),
    }
}

/// Drive the remote half-protocol: validate and countersign an incoming
/// offer, then broadcast
fn process_remote(
    state: &ClosingNegotiation,
    event: CloseEvent,
    env: &CloseEnv,
) -> Result<CloseTransition> {
    let msg = match event {
        CloseEvent::OfferReceived { msg } => msg,
        event => return Err(invalid_transition("closing_negotiation", &event)),
    };

    let terms = &state.peer_state.remote.terms;

    if msg.sequence != Sequence::MAX {
        return Err(CloseError::NonFinalSequence {
            sequence: msg.sequence.to_consensus_u32(),
        }
        .into());
    }

    // The offer omits our output exactly when it is dust.
    let expected = if terms.local_amt_is_dust() {
        SigVariant::CloserNoClosee
    } else {
        SigVariant::CloserAndClosee
    };
    let remote_sig = expect_single_sig(msg.num_sigs(), msg.signature(), expected)?;

    // The offering side pays the fee out of its own settled balance.
    let fee = msg.fee_satoshis;
    if !terms.remote_can_pay_fees(fee) {
        return Err(CloseError::RemoteCannotPay {
            balance: terms.balances.remote_balance.to_sat(),
            fee: fee.to_sat(),
        }
        .into());
    }

    let (local_sig, _closing_txid, _our_balance) = env.close_signer.create_close_proposal(
        fee,
        &terms.scripts.local_delivery_script,
        &terms.scripts.remote_delivery_script,
    )?;

    let (tx, _our_balance) = env.close_signer.complete_cooperative_close(
        &local_sig,
        &remote_sig,
        &terms.scripts.local_delivery_script,
        &terms.scripts.remote_delivery_script,
        fee,
    )?;

    env.chan_observer.mark_coop_broadcasted(&tx, false)?;

    let sig_msg = wire::ClosingSig {
        channel_id: env.chan_id,
        closer_no_closee: matches!(expected, SigVariant::CloserNoClosee).then_some(local_sig),
        closer_and_closee: matches!(expected, SigVariant::CloserAndClosee).then_some(local_sig),
    };

    let pending = ClosePending {
        close_tx: tx.clone(),
        proposed_fee: fee,
        fee_rate: implied_fee_rate(fee, &tx),
        terms: terms.clone(),
    };

    let effects = vec![
        DaemonEffect::SendMsg(SendMsgEffect {
            target_peer: env.chan_peer,
            msgs: vec![wire::Message::ClosingSig(sig_msg)],
            send_when: None,
            post_send: None,
        }),
        DaemonEffect::BroadcastTxn {
            tx,
            label: broadcast_label(env),
        },
    ];

    Ok(Transition {
        next_state: CloseState::ClosePending(pending),
        new_events: Some(Emission::external(effects)),
    })
}
