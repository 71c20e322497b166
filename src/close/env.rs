//! The close protocol environment
//!
//! An immutable bundle of dependencies fixed for the lifetime of one close
//! state machine, plus the collaborator traits the close states consult:
//! the channel observer, the close signer, and the fee estimator. The daemon
//! adapter remains the only boundary for messaging, broadcast, and chain
//! notifications; the collaborators here cover channel state and signing.

use std::sync::Arc;

use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::secp256k1::PublicKey;
use bitcoin::{Amount, FeeRate, Network, OutPoint, Script, ScriptBuf, Transaction, TxOut, Txid};

use crate::close::terms::ShutdownBalances;
use crate::errors::Result;
use crate::fsm::Environment;
use crate::types::{ChannelId, ChannelType, ShortChannelId};

/// Factory for fresh delivery scripts, used when no upfront address applies
pub type DeliveryScriptGen = Arc<dyn Fn() -> Result<ScriptBuf> + Send + Sync>;

/// Observer of channel state changes
///
/// Used to decide when the shutdown message may be sent, to persist the
/// shutdown and broadcast markers, and to fast-path flushing when the final
/// balances are already known.
pub trait ChanStateObserver: Send + Sync {
    /// True if there are no active updates that haven't been covered by a
    /// commitment signature
    fn no_dangling_updates(&self) -> bool;

    /// Instruct the channel link to stop accepting new incoming adds
    fn disable_incoming_adds(&self) -> Result<()>;

    /// Instruct the channel link to stop creating new outgoing adds
    fn disable_outgoing_adds(&self) -> Result<()>;

    /// Persist that our shutdown message has been sent
    ///
    /// Idempotent; the marker's existence means the shutdown should be
    /// re-sent on re-establish.
    fn mark_shutdown_sent(&self, delivery_script: &Script, is_initiator: bool) -> Result<()>;

    /// Persist that the cooperative close transaction has been broadcast
    ///
    /// Idempotent.
    fn mark_coop_broadcasted(&self, tx: &Transaction, locally_initiated: bool) -> Result<()>;

    /// The settled balances of the channel once it has been flushed
    ///
    /// `Some` means the channel is already in a permanently flushed state,
    /// allowing the flushing state to be fast-pathed.
    fn final_balances(&self) -> Option<ShutdownBalances>;
}

/// Signer for the cooperative close transaction
pub trait CloseSigner: Send + Sync {
    /// Create a new close proposal at the proposed fee
    ///
    /// Returns our signature, the txid of the transaction it signs, and our
    /// final balance in the proposed transaction.
    fn create_close_proposal(
        &self,
        proposed_fee: Amount,
        local_delivery_script: &Script,
        remote_delivery_script: &Script,
    ) -> Result<(Signature, Txid, Amount)>;

    /// Produce the fully signed cooperative close transaction
    ///
    /// Returns the final transaction and our balance on it.
    fn complete_cooperative_close(
        &self,
        local_sig: &Signature,
        remote_sig: &Signature,
        local_delivery_script: &Script,
        remote_delivery_script: &Script,
        proposed_fee: Amount,
    ) -> Result<(Transaction, Amount)>;
}

/// Estimator for the absolute fee of a cooperative close transaction
pub trait CoopFeeEstimator: Send + Sync {
    /// The absolute fee in satoshis for a close transaction manifesting the
    /// given outputs at the ideal fee rate
    fn estimate_fee(
        &self,
        chan_type: ChannelType,
        local_txout: Option<&TxOut>,
        remote_txout: Option<&TxOut>,
        ideal_fee_rate: FeeRate,
    ) -> Amount;
}

/// The dependencies a close state machine carries through its lifetime
///
/// All fields are immutable and fixed at construction.
#[derive(Clone)]
pub struct CloseEnv {
    /// The chain the channel lives on
    pub chain_params: Network,

    /// The peer we're closing the channel with
    pub chan_peer: PublicKey,

    /// The funding outpoint of the channel
    pub chan_point: OutPoint,

    /// The channel ID derived from the funding outpoint
    pub chan_id: ChannelId,

    /// The short channel ID of the channel
    pub scid: ShortChannelId,

    /// The commitment format of the channel
    pub chan_type: ChannelType,

    /// The fee rate used when the remote party initiated and no ideal rate
    /// was specified
    pub default_fee_rate: FeeRate,

    /// The height the channel lease expires at; `None` means the channel can
    /// be cooperatively closed at any moment
    pub thaw_height: Option<u32>,

    /// The upfront shutdown script declared by the remote party, if any
    pub remote_upfront_shutdown: Option<ScriptBuf>,

    /// Our own upfront shutdown script, if any
    pub local_upfront_shutdown: Option<ScriptBuf>,

    /// Factory for a fresh delivery script when no upfront address applies
    pub new_delivery_script: DeliveryScriptGen,

    /// The fee estimator used to price our close offers
    pub fee_estimator: Arc<dyn CoopFeeEstimator>,

    /// The channel observer consulted for gating and persistence
    pub chan_observer: Arc<dyn ChanStateObserver>,

    /// The signer producing and completing close proposals
    pub close_signer: Arc<dyn CloseSigner>,
}

impl Environment for CloseEnv {
    fn name(&self) -> String {
        format!("rbf_chan_closer({})", self.chan_point)
    }

    fn cleanup(&self) -> Result<()> {
        Ok(())
    }
}
