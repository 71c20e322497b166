//! Close terms: balances, scripts, fee and dust rules
//!
//! Shared value types describing the economic terms both negotiation
//! sub-machines work from, plus the dust threshold that decides whether an
//! output is manifested on the closing transaction at all.

use bitcoin::{Amount, ScriptBuf, TxOut};

/// The settled local and remote balances of a fully flushed channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownBalances {
    /// The local settled balance
    pub local_balance: Amount,
    /// The remote settled balance
    pub remote_balance: Amount,
}

/// The delivery scripts both sides close out to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownScripts {
    /// The script our settled funds are paid to
    pub local_delivery_script: ScriptBuf,
    /// The script the remote party's settled funds are paid to
    pub remote_delivery_script: ScriptBuf,
}

/// The terms a closing transaction is negotiated under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseChannelTerms {
    /// The settled balances after the flush
    pub balances: ShutdownBalances,
    /// The delivery scripts exchanged during shutdown
    pub scripts: ShutdownScripts,
}

/// The dust threshold for an output paying to a script of the given size
///
/// Uses the conservative relay dust rule: an output is dust when spending it
/// would cost more than a third of its value at the 3 sat/vB relay floor,
/// assuming a worst-case non-witness input of 148 vbytes.
pub fn dust_limit_for_script_size(script_len: usize) -> Amount {
    let compact_size_len = if script_len < 0xfd { 1 } else { 3 };
    let output_size = 8 + compact_size_len + script_len;
    Amount::from_sat(((output_size + 148) * 3) as u64)
}

fn derive_txout(balance: Amount, script: &ScriptBuf) -> Option<TxOut> {
    if balance > dust_limit_for_script_size(script.len()) {
        Some(TxOut {
            value: balance,
            script_pubkey: script.clone(),
        })
    } else {
        None
    }
}

impl CloseChannelTerms {
    /// Derive the local and remote outputs of the closing transaction
    ///
    /// An output below its dust threshold is not manifested and `None` is
    /// returned in its place.
    pub fn derive_close_txouts(&self) -> (Option<TxOut>, Option<TxOut>) {
        let local = derive_txout(
            self.balances.local_balance,
            &self.scripts.local_delivery_script,
        );
        let remote = derive_txout(
            self.balances.remote_balance,
            &self.scripts.remote_delivery_script,
        );

        (local, remote)
    }

    /// True if the local output is dust
    pub fn local_amt_is_dust(&self) -> bool {
        self.balances.local_balance
            < dust_limit_for_script_size(self.scripts.local_delivery_script.len())
    }

    /// True if the remote output is dust
    pub fn remote_amt_is_dust(&self) -> bool {
        self.balances.remote_balance
            < dust_limit_for_script_size(self.scripts.remote_delivery_script.len())
    }

    /// True if the local party can pay the absolute fee from its settled
    /// balance
    pub fn local_can_pay_fees(&self, absolute_fee: Amount) -> bool {
        self.balances.local_balance >= absolute_fee
    }

    /// True if the remote party can pay the absolute fee from its settled
    /// balance
    pub fn remote_can_pay_fees(&self, absolute_fee: Amount) -> bool {
        self.balances.remote_balance >= absolute_fee
    }
}
