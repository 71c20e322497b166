//! ShutdownPending state
//!
//! Entered once we've sent or received a shutdown message. If we initiated,
//! we still need the remote party's shutdown to learn its delivery script;
//! if we responded, we already have it. The `ShutdownComplete` event (the
//! post-send acknowledgement of our own shutdown) moves the machine on to
//! flushing.

use bitcoin::{FeeRate, ScriptBuf};

/// Shutdown sent or received; waiting for the exchange to complete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownPending {
    /// The script our settled funds will be paid to
    pub local_delivery_script: ScriptBuf,

    /// The remote delivery script, once received or known upfront
    pub remote_delivery_script: Option<ScriptBuf>,

    /// The fee rate we'd like to use for the closing attempt, when we are
    /// the one driving this round
    pub ideal_fee_rate: Option<FeeRate>,
}
