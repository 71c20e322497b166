//! Close protocol events
//!
//! The event family consumed (and self-emitted) by the close state machine.
//! External callers feed `SendShutdown` and the wire-derived events; the
//! states themselves emit `ShutdownComplete`, `ChannelFlushed`, and
//! `SendOffer` to drive their own micro-transitions.

use bitcoin::{FeeRate, ScriptBuf, Transaction};

use crate::close::terms::ShutdownBalances;
use crate::wire;

/// An event driving the cooperative close state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseEvent {
    /// The user wants to cooperatively close the channel, so a shutdown
    /// message should be sent to the remote party
    ///
    /// From `ClosePending` this instead starts a fresh RBF iteration at the
    /// given (strictly higher) fee rate.
    SendShutdown {
        /// The fee rate to target for the closing transaction
        ideal_fee_rate: FeeRate,
        /// The script to pay our settled funds to; a fresh script is derived
        /// when unset and no upfront script applies
        delivery_script: Option<ScriptBuf>,
    },

    /// The remote party sent its shutdown message
    ShutdownReceived {
        /// The height the shutdown was received at, used to enforce channel
        /// leases
        block_height: u32,
        /// The script the remote party wants its settled funds paid to
        shutdown_script: ScriptBuf,
    },

    /// Both sides have exchanged shutdown, so flushing can begin
    ShutdownComplete,

    /// The channel has no more dangling updates and negotiation can start
    ChannelFlushed {
        /// Whether this is the first flush, or a re-flush for an RBF
        /// iteration
        fresh_flush: bool,
        /// The settled balances after the flush; `None` when the flush
        /// completed but the balances could not be resolved
        balances: Option<ShutdownBalances>,
    },

    /// Self-triggered: send our close offer at the target fee rate
    SendOffer {
        /// The fee rate our offer prices the closing transaction at
        target_fee_rate: FeeRate,
    },

    /// The remote party sent a close offer
    OfferReceived {
        /// The received offer
        msg: wire::ClosingComplete,
    },

    /// The remote party countersigned our close offer
    LocalSigReceived {
        /// The received countersignature
        msg: wire::ClosingSig,
    },

    /// A transaction spending the funding outpoint has confirmed
    Spend {
        /// The confirmed spending transaction
        tx: Transaction,
        /// The height of the confirming block
        block_height: u32,
    },
}

impl CloseEvent {
    /// A short stable name for logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            CloseEvent::SendShutdown { .. } => "send_shutdown",
            CloseEvent::ShutdownReceived { .. } => "shutdown_received",
            CloseEvent::ShutdownComplete => "shutdown_complete",
            CloseEvent::ChannelFlushed { .. } => "channel_flushed",
            CloseEvent::SendOffer { .. } => "send_offer",
            CloseEvent::OfferReceived { .. } => "offer_received",
            CloseEvent::LocalSigReceived { .. } => "local_sig_received",
            CloseEvent::Spend { .. } => "spend",
        }
    }
}
