//! ShutdownPending transitions
//!
//! While the shutdown exchange is in flight we may still learn the remote
//! party's delivery script (initiator path), and the post-send
//! `ShutdownComplete` acknowledgement moves the machine on to flushing. When
//! the observer already knows the final balances, flushing is fast-pathed
//! with an immediate internal `ChannelFlushed`.

use super::{active::validate_remote_shutdown, invalid_transition};
use crate::close::env::CloseEnv;
use crate::close::events::CloseEvent;
use crate::close::state::{ChannelFlushing, CloseState, ShutdownPending};
use crate::close::terms::ShutdownScripts;
use crate::close::CloseTransition;
use crate::errors::{CloseError, Result};
use crate::fsm::{Emission, Transition};

pub(super) fn process_event(
    state: &ShutdownPending,
    event: CloseEvent,
    env: &CloseEnv,
) -> Result<CloseTransition> {
    match event {
        // The remote party's shutdown arrived; record its delivery script.
        CloseEvent::ShutdownReceived {
            block_height,
            shutdown_script,
        } => {
            validate_remote_shutdown(env, block_height, &shutdown_script)?;

            let next = ShutdownPending {
                remote_delivery_script: Some(shutdown_script),
                ..state.clone()
            };

            Ok(Transition {
                next_state: CloseState::ShutdownPending(next),
                new_events: None,
            })
        }

        CloseEvent::ShutdownComplete => {
            let remote_delivery_script = state
                .remote_delivery_script
                .clone()
                .or_else(|| env.remote_upfront_shutdown.clone())
                .ok_or(CloseError::NoRemoteDeliveryScript)?;

            let scripts = ShutdownScripts {
                local_delivery_script: state.local_delivery_script.clone(),
                remote_delivery_script,
            };

            let flushing = ChannelFlushing {
                scripts,
                ideal_fee_rate: state.ideal_fee_rate,
                early_remote_offer: None,
            };

            // If the channel is already permanently flushed, skip waiting for
            // the external flush notification.
            let internal = env.chan_observer.final_balances().map(|balances| {
                CloseEvent::ChannelFlushed {
                    fresh_flush: true,
                    balances: Some(balances),
                }
            });

            Ok(Transition {
                next_state: CloseState::ChannelFlushing(flushing),
                new_events: internal.map(Emission::internal),
            })
        }

        event => Err(invalid_transition("shutdown_pending", &event)),
    }
}
