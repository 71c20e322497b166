//! RBF-enabled cooperative channel close protocol
//!
//! A concrete protocol built on the [`crate::fsm`] runtime: the negotiation
//! that cooperatively closes a Lightning-style payment channel, with support
//! for RBF fee iterations until the close transaction confirms on chain.
//!
//! # Structure
//!
//! The module is organized into functional domains:
//! - `state/`: the close state graph (active, shutdown pending, flushing,
//!   negotiation, pending, fin)
//! - `transition/`: per-state transition functions
//! - `env`: the immutable dependency bundle and its collaborator traits
//! - `terms`: settled balances, delivery scripts, fee and dust rules
//! - `tx`: the unsigned cooperative close transaction builder
//! - `mapper`: translation of wire messages into protocol events

pub mod env;
pub mod events;
pub mod mapper;
pub mod state;
pub mod terms;
pub mod transition;
pub mod tx;

#[cfg(test)]
pub mod test_utils;

use crate::fsm::{DaemonEffect, Emission, StateMachine, StateMachineCfg, Transition};

pub use env::{ChanStateObserver, CloseEnv, CloseSigner, CoopFeeEstimator, DeliveryScriptGen};
pub use events::CloseEvent;
pub use mapper::{BestHeightFn, CloseMsgMapper};
pub use state::{
    ChannelActive, ChannelFlushing, ClosePending, CloseFin, CloseState, ClosingNegotiation,
    DualPeerState, LocalCloseStart, LocalOfferSent, LocalPeerState, RemoteCloseStart,
    ShutdownPending,
};
pub use terms::{
    dust_limit_for_script_size, CloseChannelTerms, ShutdownBalances, ShutdownScripts,
};
pub use tx::build_close_transaction;

/// A state transition of the close protocol
pub type CloseTransition = Transition<CloseState>;

/// An emission produced by a close protocol transition
pub type CloseEmission = Emission<CloseEvent>;

/// A daemon effect emitted by the close protocol
pub type CloseDaemonEffect = DaemonEffect<CloseEvent>;

/// A state machine driving the RBF cooperative close protocol
pub type RbfChanCloser = StateMachine<CloseState>;

/// Configuration for an RBF cooperative close state machine
pub type RbfChanCloserCfg = StateMachineCfg<CloseState>;
