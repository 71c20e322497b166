//! ChannelFlushing state
//!
//! Entered after the shutdown exchange. The machine waits for the
//! `ChannelFlushed` event before negotiation can start. A remote close
//! offer arriving early, before our own flush completes, is stashed and
//! replayed as an internal event once the flush lands.

use bitcoin::FeeRate;

use crate::close::terms::ShutdownScripts;
use crate::wire;

/// Waiting for all dangling updates to drain from the channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelFlushing {
    /// The delivery scripts fixed during the shutdown exchange
    pub scripts: ShutdownScripts,

    /// The fee rate we'll target once flushed, when we drive this round
    pub ideal_fee_rate: Option<FeeRate>,

    /// An offer the remote party sent before our flush completed, replayed
    /// on entry into negotiation
    pub early_remote_offer: Option<wire::ClosingComplete>,
}
