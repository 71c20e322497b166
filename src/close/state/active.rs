//! ChannelActive state
//!
//! The base state of the close machine. The channel is fully operational
//! and no shutdown has been sent or received. A `SendShutdown` or
//! `ShutdownReceived` event moves the machine to `ShutdownPending`, sending
//! our own shutdown message along the way.

/// The channel is active and the shutdown process has not begun
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelActive;
