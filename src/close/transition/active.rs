//! ChannelActive transitions
//!
//! Both entry paths into the close flow live here: the user asking us to
//! initiate (`SendShutdown`), and the remote party initiating
//! (`ShutdownReceived`). Either way we resolve our delivery script, gate the
//! channel link, persist the shutdown marker, and emit our own shutdown
//! message deferred behind channel quiescence.

use std::sync::Arc;

use bitcoin::{FeeRate, ScriptBuf};

use super::invalid_transition;
use crate::close::env::CloseEnv;
use crate::close::events::CloseEvent;
use crate::close::state::{ChannelActive, CloseState, ShutdownPending};
use crate::close::CloseTransition;
use crate::errors::{CloseError, Result};
use crate::fsm::{DaemonEffect, Emission, SendMsgEffect, Transition};
use crate::wire;

pub(super) fn process_event(
    _state: &ChannelActive,
    event: CloseEvent,
    env: &CloseEnv,
) -> Result<CloseTransition> {
    match event {
        CloseEvent::SendShutdown {
            ideal_fee_rate,
            delivery_script,
        } => begin_shutdown(
            env,
            Some(ideal_fee_rate),
            delivery_script,
            env.remote_upfront_shutdown.clone(),
            true,
        ),

        CloseEvent::ShutdownReceived {
            block_height,
            shutdown_script,
        } => {
            validate_remote_shutdown(env, block_height, &shutdown_script)?;
            begin_shutdown(env, None, None, Some(shutdown_script), false)
        }

        event => Err(invalid_transition("channel_active", &event)),
    }
}

/// Validate an incoming shutdown against the channel lease and the remote
/// party's declared upfront script
pub(super) fn validate_remote_shutdown(
    env: &CloseEnv,
    block_height: u32,
    shutdown_script: &ScriptBuf,
) -> Result<()> {
    if let Some(thaw_height) = env.thaw_height {
        if block_height < thaw_height {
            return Err(CloseError::ThawHeightNotReached {
                thaw_height,
                height: block_height,
            }
            .into());
        }
    }

    if let Some(upfront) = &env.remote_upfront_shutdown {
        if upfront != shutdown_script {
            return Err(CloseError::UpfrontScriptMismatch.into());
        }
    }

    Ok(())
}

/// Begin the shutdown exchange: gate the link, persist the marker, and send
/// our shutdown once the channel is quiescent
fn begin_shutdown(
    env: &CloseEnv,
    ideal_fee_rate: Option<FeeRate>,
    delivery_script: Option<ScriptBuf>,
    remote_delivery_script: Option<ScriptBuf>,
    is_initiator: bool,
) -> Result<CloseTransition> {
    let local_delivery_script = match delivery_script.or_else(|| env.local_upfront_shutdown.clone())
    {
        Some(script) => script,
        None => (env.new_delivery_script)()?,
    };

    // Both add directions must be disabled before entering ShutdownPending.
    env.chan_observer.disable_incoming_adds()?;
    env.chan_observer.disable_outgoing_adds()?;
    env.chan_observer
        .mark_shutdown_sent(&local_delivery_script, is_initiator)?;

    let shutdown = wire::Shutdown {
        channel_id: env.chan_id,
        script: local_delivery_script.clone(),
    };

    // The link may still have updates in flight, so the shutdown only goes
    // out once the channel is quiescent. The post-send event then moves us
    // on to flushing.
    let observer = Arc::clone(&env.chan_observer);
    let effect = DaemonEffect::SendMsg(SendMsgEffect {
        target_peer: env.chan_peer,
        msgs: vec![wire::Message::Shutdown(shutdown)],
        send_when: Some(Arc::new(move || observer.no_dangling_updates())),
        post_send: Some(CloseEvent::ShutdownComplete),
    });

    let next = ShutdownPending {
        local_delivery_script,
        remote_delivery_script,
        ideal_fee_rate,
    };

    Ok(Transition {
        next_state: CloseState::ShutdownPending(next),
        new_events: Some(Emission::external(vec![effect])),
    })
}
