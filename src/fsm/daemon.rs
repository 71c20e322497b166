//! Effect descriptions and the daemon I/O boundary
//!
//! States never perform I/O themselves. They emit [`DaemonEffect`] values
//! describing the work, and the driver executes each one through the
//! [`DaemonAdapters`] implementation supplied at construction. Adapters must
//! be safe for concurrent submission: the driver and its auxiliary tasks may
//! invoke them at the same time.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::secp256k1::PublicKey;
use bitcoin::{OutPoint, ScriptBuf, Transaction, Txid};
use tokio::sync::oneshot;

use crate::errors::Result;
use crate::wire;

/// A predicate gating a deferred message send
///
/// The driver polls the predicate on a fixed interval and performs the send
/// on the first `true` result.
pub type SendPredicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// A message send requested by a state transition
pub struct SendMsgEffect<Ev> {
    /// The peer the messages are destined for
    pub target_peer: PublicKey,

    /// The messages to send, in order
    pub msgs: Vec<wire::Message>,

    /// If set, the send is deferred until the predicate first yields true
    pub send_when: Option<SendPredicate>,

    /// An event re-entered into the machine once the send has completed
    pub post_send: Option<Ev>,
}

/// A request to be notified when an outpoint is spent
pub struct RegisterSpendEffect<Ev> {
    /// The outpoint to watch
    pub outpoint: OutPoint,

    /// The script the outpoint creates, for script-based filtering backends
    pub pk_script: ScriptBuf,

    /// The earliest height the spend could have happened at
    pub height_hint: u32,

    /// An event re-entered into the machine once the spend is seen
    pub post_spend: Option<Ev>,
}

/// A request to be notified once a transaction confirms
pub struct RegisterConfEffect<Ev> {
    /// The transaction to watch; `None` means match by script alone
    pub txid: Option<Txid>,

    /// The script to match confirmations against
    pub pk_script: ScriptBuf,

    /// Number of confirmations to wait for; defaults to 1 when unset
    pub num_confs: Option<u32>,

    /// The earliest height the confirmation could have happened at
    pub height_hint: u32,

    /// An event re-entered into the machine once the confirmation arrives
    pub post_conf: Option<Ev>,
}

/// An effect a state transition asks the daemon to perform
pub enum DaemonEffect<Ev> {
    /// Send wire messages to a peer, optionally deferred behind a predicate
    SendMsg(SendMsgEffect<Ev>),

    /// Broadcast a transaction with the given label
    BroadcastTxn {
        /// The transaction to broadcast
        tx: Transaction,
        /// A label recorded alongside the broadcast
        label: String,
    },

    /// Disable the target channel so no new updates are routed over it
    DisableChannel {
        /// The funding outpoint identifying the channel
        chan_point: OutPoint,
    },

    /// Register for a spend notification of the target outpoint
    RegisterSpend(RegisterSpendEffect<Ev>),

    /// Register for a confirmation notification of the target transaction
    RegisterConf(RegisterConfEffect<Ev>),
}

impl<Ev: fmt::Debug> fmt::Debug for DaemonEffect<Ev> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaemonEffect::SendMsg(send) => f
                .debug_struct("SendMsg")
                .field("target_peer", &send.target_peer)
                .field("msgs", &send.msgs)
                .field("send_when", &send.send_when.as_ref().map(|_| "<predicate>"))
                .field("post_send", &send.post_send)
                .finish(),
            DaemonEffect::BroadcastTxn { tx, label } => f
                .debug_struct("BroadcastTxn")
                .field("txid", &tx.compute_txid())
                .field("label", label)
                .finish(),
            DaemonEffect::DisableChannel { chan_point } => f
                .debug_struct("DisableChannel")
                .field("chan_point", chan_point)
                .finish(),
            DaemonEffect::RegisterSpend(spend) => f
                .debug_struct("RegisterSpend")
                .field("outpoint", &spend.outpoint)
                .field("height_hint", &spend.height_hint)
                .field("post_spend", &spend.post_spend)
                .finish(),
            DaemonEffect::RegisterConf(conf) => f
                .debug_struct("RegisterConf")
                .field("txid", &conf.txid)
                .field("num_confs", &conf.num_confs)
                .field("height_hint", &conf.height_hint)
                .field("post_conf", &conf.post_conf)
                .finish(),
        }
    }
}

/// Details of a spend delivered by the chain notifier
#[derive(Debug, Clone)]
pub struct SpendDetail {
    /// The transaction spending the watched outpoint
    pub spending_tx: Transaction,

    /// The height of the block containing the spend
    pub spending_height: u32,
}

/// Details of a confirmation delivered by the chain notifier
#[derive(Debug, Clone)]
pub struct ConfDetail {
    /// The height of the block that produced the requested confirmation depth
    pub block_height: u32,
}

/// A pending spend notification
///
/// The notifier fires the one-shot channel once the watched outpoint is
/// spent by a confirmed transaction.
#[derive(Debug)]
pub struct SpendNtfn {
    /// Delivers the spend details exactly once
    pub spent: oneshot::Receiver<SpendDetail>,
}

/// A pending confirmation notification
///
/// The notifier fires the one-shot channel once the watched transaction (or
/// script) reaches the requested confirmation depth.
#[derive(Debug)]
pub struct ConfNtfn {
    /// Delivers the confirmation details exactly once
    pub confirmed: oneshot::Receiver<ConfDetail>,
}

/// The set of adapters bridging the pure state machine to the daemon
///
/// Implementations cover peer messaging, transaction broadcast, channel
/// gating, and chain notification registration. All methods may be invoked
/// concurrently.
#[async_trait]
pub trait DaemonAdapters: Send + Sync {
    /// Send the target set of messages to the target peer
    async fn send_messages(&self, peer: PublicKey, msgs: Vec<wire::Message>) -> Result<()>;

    /// Broadcast a transaction with the target label
    async fn broadcast_transaction(&self, tx: &Transaction, label: &str) -> Result<()>;

    /// Disable the target channel
    async fn disable_channel(&self, chan_point: OutPoint) -> Result<()>;

    /// Register an intent to be notified once `txid` reaches `num_confs`
    /// confirmations
    ///
    /// The script is passed alongside so light-client backends can match on
    /// scripts created in a block. A `None` txid means: match on the script,
    /// and dispatch once the transaction containing it reaches `num_confs`
    /// confirmations.
    async fn register_confirmations_ntfn(
        &self,
        txid: Option<Txid>,
        pk_script: ScriptBuf,
        num_confs: u32,
        height_hint: u32,
    ) -> Result<ConfNtfn>;

    /// Register an intent to be notified once the target outpoint is spent
    ///
    /// The script the outpoint creates must also be specified, which allows
    /// BIP 158-like filtering backends to implement this interface.
    async fn register_spend_ntfn(
        &self,
        outpoint: OutPoint,
        pk_script: ScriptBuf,
        height_hint: u32,
    ) -> Result<SpendNtfn>;
}
