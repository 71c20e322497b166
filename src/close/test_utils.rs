//! Shared test utilities for close module tests
//!
//! This module provides deterministic keys and scripts, configurable mock
//! collaborators, and an environment builder used across the close module
//! tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bitcoin::hashes::Hash;
use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::secp256k1::{Message as SecpMessage, PublicKey, Secp256k1, SecretKey};
use bitcoin::{Amount, FeeRate, Network, OutPoint, Script, ScriptBuf, Transaction, TxOut, Txid};

use crate::close::env::{
    ChanStateObserver, CloseEnv, CloseSigner, CoopFeeEstimator,
};
use crate::close::terms::{CloseChannelTerms, ShutdownBalances, ShutdownScripts};
use crate::close::tx::build_close_transaction;
use crate::errors::{DaemonError, Result};
use crate::types::{ChannelId, ChannelType};

/// Deterministically derive a secret key from a single byte (tests only)
pub fn deterministic_secret(byte: u8) -> SecretKey {
    SecretKey::from_slice(&[byte; 32]).expect("32-byte array should always be a valid SecretKey")
}

/// The peer we pretend to close a channel with
pub fn test_peer() -> PublicKey {
    let secp = Secp256k1::new();
    PublicKey::from_secret_key(&secp, &deterministic_secret(1))
}

/// A deterministic 22-byte local delivery script
pub fn local_script() -> ScriptBuf {
    ScriptBuf::from_bytes(vec![0x51; 22])
}

/// A deterministic 22-byte remote delivery script
pub fn remote_script() -> ScriptBuf {
    ScriptBuf::from_bytes(vec![0x52; 22])
}

/// The funding outpoint of the channel under test
pub fn funding_outpoint() -> OutPoint {
    OutPoint::new(Txid::from_byte_array([3u8; 32]), 0)
}

/// The channel ID of the channel under test
pub fn chan_id() -> ChannelId {
    [7u8; 32]
}

/// A deterministic signature unrelated to any transaction
pub fn test_sig() -> Signature {
    let secp = Secp256k1::new();
    secp.sign_ecdsa(&SecpMessage::from_digest([2u8; 32]), &deterministic_secret(9))
}

/// The settled balances used by most scenarios: both outputs non-dust
pub fn standard_balances() -> ShutdownBalances {
    ShutdownBalances {
        local_balance: Amount::from_sat(500_000),
        remote_balance: Amount::from_sat(400_000),
    }
}

/// Close terms over the standard balances and deterministic scripts
pub fn standard_terms() -> CloseChannelTerms {
    CloseChannelTerms {
        balances: standard_balances(),
        scripts: ShutdownScripts {
            local_delivery_script: local_script(),
            remote_delivery_script: remote_script(),
        },
    }
}

/// A channel observer with settable knobs
pub struct TestChanObserver {
    /// Whether the channel currently has no dangling updates
    pub no_dangling: AtomicBool,
    /// What `final_balances` returns
    pub balances: Mutex<Option<ShutdownBalances>>,
    /// Recorded `mark_shutdown_sent` calls
    pub shutdown_markers: Mutex<Vec<(ScriptBuf, bool)>>,
    /// Recorded `mark_coop_broadcasted` calls
    pub broadcast_markers: Mutex<Vec<(Txid, bool)>>,
    /// Whether the add-disabling calls should fail
    pub fail_disables: AtomicBool,
    /// Whether incoming adds have been disabled
    pub incoming_disabled: AtomicBool,
    /// Whether outgoing adds have been disabled
    pub outgoing_disabled: AtomicBool,
}

impl TestChanObserver {
    /// An observer with a quiescent channel and known final balances
    pub fn new(balances: Option<ShutdownBalances>) -> Self {
        Self {
            no_dangling: AtomicBool::new(true),
            balances: Mutex::new(balances),
            shutdown_markers: Mutex::new(Vec::new()),
            broadcast_markers: Mutex::new(Vec::new()),
            fail_disables: AtomicBool::new(false),
            incoming_disabled: AtomicBool::new(false),
            outgoing_disabled: AtomicBool::new(false),
        }
    }
}

impl ChanStateObserver for TestChanObserver {
    fn no_dangling_updates(&self) -> bool {
        self.no_dangling.load(Ordering::SeqCst)
    }

    fn disable_incoming_adds(&self) -> Result<()> {
        if self.fail_disables.load(Ordering::SeqCst) {
            return Err(DaemonError::DisableChannel("link offline".into()).into());
        }
        self.incoming_disabled.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disable_outgoing_adds(&self) -> Result<()> {
        if self.fail_disables.load(Ordering::SeqCst) {
            return Err(DaemonError::DisableChannel("link offline".into()).into());
        }
        self.outgoing_disabled.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn mark_shutdown_sent(&self, delivery_script: &Script, is_initiator: bool) -> Result<()> {
        self.shutdown_markers
            .lock()
            .unwrap()
            .push((delivery_script.to_owned(), is_initiator));
        Ok(())
    }

    fn mark_coop_broadcasted(&self, tx: &Transaction, locally_initiated: bool) -> Result<()> {
        self.broadcast_markers
            .lock()
            .unwrap()
            .push((tx.compute_txid(), locally_initiated));
        Ok(())
    }

    fn final_balances(&self) -> Option<ShutdownBalances> {
        *self.balances.lock().unwrap()
    }
}

/// A close signer building real (unsigned) close transactions
///
/// The fee is deducted from whichever side pays per the construction flag,
/// and the signature deterministically commits to the resulting txid.
pub struct TestCloseSigner {
    funding_outpoint: OutPoint,
    balances: ShutdownBalances,
    local_pays: bool,
    secret: SecretKey,
}

impl TestCloseSigner {
    /// A signer over the given balances; `local_pays` picks the fee payer
    pub fn new(funding_outpoint: OutPoint, balances: ShutdownBalances, local_pays: bool) -> Self {
        Self {
            funding_outpoint,
            balances,
            local_pays,
            secret: deterministic_secret(5),
        }
    }

    fn build(
        &self,
        fee: Amount,
        local_delivery_script: &Script,
        remote_delivery_script: &Script,
    ) -> (Transaction, Amount) {
        let mut local = self.balances.local_balance;
        let mut remote = self.balances.remote_balance;
        if self.local_pays {
            local = local.checked_sub(fee).unwrap_or(Amount::ZERO);
        } else {
            remote = remote.checked_sub(fee).unwrap_or(Amount::ZERO);
        }

        let terms = CloseChannelTerms {
            balances: ShutdownBalances {
                local_balance: local,
                remote_balance: remote,
            },
            scripts: ShutdownScripts {
                local_delivery_script: local_delivery_script.to_owned(),
                remote_delivery_script: remote_delivery_script.to_owned(),
            },
        };
        let (local_txout, remote_txout) = terms.derive_close_txouts();

        (
            build_close_transaction(self.funding_outpoint, local_txout, remote_txout),
            local,
        )
    }

    fn sign(&self, tx: &Transaction) -> Signature {
        let secp = Secp256k1::new();
        let digest = tx.compute_txid().to_byte_array();
        secp.sign_ecdsa(&SecpMessage::from_digest(digest), &self.secret)
    }
}

impl CloseSigner for TestCloseSigner {
    fn create_close_proposal(
        &self,
        proposed_fee: Amount,
        local_delivery_script: &Script,
        remote_delivery_script: &Script,
    ) -> Result<(Signature, Txid, Amount)> {
        let (tx, our_balance) =
            self.build(proposed_fee, local_delivery_script, remote_delivery_script);
        Ok((self.sign(&tx), tx.compute_txid(), our_balance))
    }

    fn complete_cooperative_close(
        &self,
        _local_sig: &Signature,
        _remote_sig: &Signature,
        local_delivery_script: &Script,
        remote_delivery_script: &Script,
        proposed_fee: Amount,
    ) -> Result<(Transaction, Amount)> {
        let (tx, our_balance) =
            self.build(proposed_fee, local_delivery_script, remote_delivery_script);
        Ok((tx, our_balance))
    }
}

/// A fee estimator pricing the assembled close transaction by vsize
pub struct VsizeFeeEstimator;

impl CoopFeeEstimator for VsizeFeeEstimator {
    fn estimate_fee(
        &self,
        _chan_type: ChannelType,
        local_txout: Option<&TxOut>,
        remote_txout: Option<&TxOut>,
        ideal_fee_rate: FeeRate,
    ) -> Amount {
        let tx = build_close_transaction(
            OutPoint::null(),
            local_txout.cloned(),
            remote_txout.cloned(),
        );
        // Allow for the witness data both signatures will add.
        let vsize = tx.vsize() as u64 + 28;
        Amount::from_sat(ideal_fee_rate.to_sat_per_vb_ceil() * vsize)
    }
}

/// An environment over the mock collaborators with sane defaults
///
/// Fields are plain data, so tests tweak the returned value directly
/// (thaw height, upfront scripts, default fee rate).
pub fn test_env(observer: Arc<TestChanObserver>, signer: Arc<TestCloseSigner>) -> CloseEnv {
    CloseEnv {
        chain_params: Network::Regtest,
        chan_peer: test_peer(),
        chan_point: funding_outpoint(),
        chan_id: chan_id(),
        scid: 1,
        chan_type: ChannelType::Anchors,
        default_fee_rate: FeeRate::from_sat_per_vb_unchecked(10),
        thaw_height: None,
        remote_upfront_shutdown: None,
        local_upfront_shutdown: Some(local_script()),
        new_delivery_script: Arc::new(|| Ok(local_script())),
        fee_estimator: Arc::new(VsizeFeeEstimator),
        chan_observer: observer,
        close_signer: signer,
    }
}
