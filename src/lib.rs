#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Coopclose
//!
//! A protocol state machine runtime, and a concrete protocol built on top of
//! it: an RBF-enabled cooperative close for a Lightning-style payment
//! channel.
//!
//! The runtime (the [`fsm`] module) drives user-defined states to completion.
//! States are pure values that map `(event, environment)` to a transition,
//! and request all I/O by describing it as [`fsm::DaemonEffect`] values which
//! the driver executes through a [`fsm::DaemonAdapters`] implementation. The
//! close protocol (the [`close`] module) supplies the state graph, the fee
//! and dust rules, and the asymmetric negotiation sub-machines.

pub mod close;
pub mod errors;
pub mod fsm;
pub mod types;
pub mod wire;

// Re-export commonly used types
pub use errors::{CloseError, DaemonError, Error, FsmError, Result};
