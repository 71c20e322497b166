//! Error types for the coopclose library
//!
//! This module defines all error types used throughout the library,
//! providing detailed error information for debugging and handling.

use thiserror::Error;

/// The main error type for the coopclose library
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// State machine runtime errors
    #[error(transparent)]
    Fsm(#[from] FsmError),

    /// Daemon adapter submission errors
    #[error(transparent)]
    Daemon(#[from] DaemonError),

    /// Cooperative close protocol errors
    #[error(transparent)]
    Close(#[from] CloseError),
}

/// Errors raised by the state machine runtime itself
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum FsmError {
    /// A query or send was attempted against a stopped state machine
    #[error("state machine is shutting down")]
    ShuttingDown,

    /// The driver did not answer a state query within the bounded interval
    #[error("state query timed out")]
    StateQueryTimeout,
}

/// Errors returned by daemon adapter implementations
///
/// Adapters wrap their backend failures in these variants so the driver can
/// surface them with context attached.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DaemonError {
    /// Sending wire messages to the peer failed
    #[error("unable to send messages: {0}")]
    SendMessages(String),

    /// Broadcasting a transaction failed
    #[error("unable to broadcast transaction: {0}")]
    Broadcast(String),

    /// Disabling the channel failed
    #[error("unable to disable channel: {0}")]
    DisableChannel(String),

    /// Registering a spend notification failed
    #[error("unable to register spend notification: {0}")]
    RegisterSpend(String),

    /// Registering a confirmation notification failed
    #[error("unable to register confirmation notification: {0}")]
    RegisterConf(String),
}

/// Errors that can occur while driving the cooperative close protocol
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CloseError {
    /// The event is not routable in the current state
    #[error("invalid state transition: {event} in state {state}")]
    InvalidStateTransition {
        /// Name of the state that rejected the event
        state: &'static str,
        /// Name of the rejected event
        event: &'static str,
    },

    /// The flush completed but the final channel balances are unresolved
    #[error("unknown final balance")]
    UnknownFinalBalance,

    /// The remote party attached more signatures than expected
    #[error("too many sigs received: {received}")]
    TooManySigs {
        /// Number of signatures carried by the message
        received: usize,
    },

    /// The remote signature covers a non-final input sequence
    #[error("received non-final sequence {sequence:#010x}")]
    NonFinalSequence {
        /// The sequence number carried by the message
        sequence: u32,
    },

    /// The closee output is dust, yet the signature covers it
    #[error("expected CloserNoClosee sig")]
    CloserNoClosee,

    /// A signature covering both outputs was expected but not present
    #[error("expected CloserAndClosee sig")]
    CloserAndClosee,

    /// The remote party must pay the close fee but cannot afford it
    #[error("remote cannot pay fees: balance {balance} sat, fee {fee} sat")]
    RemoteCannotPay {
        /// The remote settled balance in satoshis
        balance: u64,
        /// The proposed absolute fee in satoshis
        fee: u64,
    },

    /// A shutdown arrived before the channel lease expired
    #[error("cannot co-op close: thaw height {thaw_height} not reached at height {height}")]
    ThawHeightNotReached {
        /// The height at which the channel thaws
        thaw_height: u32,
        /// The height at which the shutdown was received
        height: u32,
    },

    /// The remote shutdown script differs from the declared upfront script
    #[error("remote shutdown script does not match upfront shutdown script")]
    UpfrontScriptMismatch,

    /// No remote delivery script was received or declared upfront
    #[error("no remote delivery script available")]
    NoRemoteDeliveryScript,

    /// An RBF iteration was requested at a fee rate that does not increase
    #[error("proposed fee rate {proposed} sat/vB is not above the current {current} sat/vB")]
    FeeRateTooLow {
        /// The proposed fee rate in sat/vB
        proposed: u64,
        /// The fee rate of the pending close transaction in sat/vB
        current: u64,
    },

    /// A remote RBF offer does not pay more than the pending close
    #[error("remote offer of {offered} sat does not exceed the pending fee of {pending} sat")]
    FeeOfferTooLow {
        /// The absolute fee carried by the remote offer in satoshis
        offered: u64,
        /// The absolute fee of the pending close transaction in satoshis
        pending: u64,
    },
}

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
