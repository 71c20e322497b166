//! ClosePending and CloseFin states
//!
//! `ClosePending` holds a fully signed, broadcast close transaction. The
//! machine is not truly done yet: a spend confirmation moves it to the
//! terminal `CloseFin`, while a fresh shutdown request or remote offer at a
//! higher fee starts another RBF iteration back through `ChannelFlushing`.

use bitcoin::{Amount, FeeRate, Transaction};

use crate::close::terms::CloseChannelTerms;

/// A signed close transaction has been broadcast; awaiting confirmation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosePending {
    /// The pending close transaction
    pub close_tx: Transaction,

    /// The absolute fee the pending transaction pays
    pub proposed_fee: Amount,

    /// The fee rate of the pending transaction
    pub fee_rate: FeeRate,

    /// The terms the pending transaction was negotiated under, retained for
    /// RBF iterations
    pub terms: CloseChannelTerms,
}

/// The terminal state: the funding spend confirmed on chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFin {
    /// The transaction that confirmed the channel close
    pub confirmed_tx: Transaction,
}
