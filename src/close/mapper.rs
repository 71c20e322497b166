//! Wire message to protocol event translation
//!
//! Lets a surrounding dispatcher feed raw close wire traffic to the state
//! machine. Only messages addressed to this mapper's channel are handled.

use std::sync::Arc;

use crate::close::events::CloseEvent;
use crate::fsm::MsgMapper;
use crate::types::ChannelId;
use crate::wire;

/// Provider of the current best chain height
///
/// Consulted when stamping an incoming shutdown, so lease enforcement sees
/// the height the message arrived at.
pub type BestHeightFn = Arc<dyn Fn() -> u32 + Send + Sync>;

/// Maps close wire messages to close protocol events
pub struct CloseMsgMapper {
    chan_id: ChannelId,
    best_height: BestHeightFn,
}

impl CloseMsgMapper {
    /// Create a mapper for the given channel
    pub fn new(chan_id: ChannelId, best_height: BestHeightFn) -> Self {
        Self {
            chan_id,
            best_height,
        }
    }
}

impl MsgMapper for CloseMsgMapper {
    type Event = CloseEvent;

    fn map_msg(&self, msg: &wire::Message) -> Option<CloseEvent> {
        if msg.channel_id() != self.chan_id {
            return None;
        }

        match msg {
            wire::Message::Shutdown(shutdown) => Some(CloseEvent::ShutdownReceived {
                block_height: (self.best_height)(),
                shutdown_script: shutdown.script.clone(),
            }),
            wire::Message::ClosingComplete(offer) => Some(CloseEvent::OfferReceived {
                msg: offer.clone(),
            }),
            wire::Message::ClosingSig(sig) => Some(CloseEvent::LocalSigReceived {
                msg: sig.clone(),
            }),
        }
    }
}
