//! Cooperative close transaction builder
//!
//! Assembles the unsigned cooperative close transaction: a single input
//! spending the funding outpoint with a final sequence, no lock time, and
//! the non-dust outputs in local/remote order. Signer implementations and
//! fee estimators share this shape so both sides sign the same transaction.

use bitcoin::absolute::LockTime;
use bitcoin::transaction::Version;
use bitcoin::{OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};

/// Build the unsigned cooperative close transaction
///
/// Dust outputs are passed as `None` and simply omitted. The input carries a
/// final sequence so the transaction remains replaceable only through the
/// cooperative RBF flow, and an empty witness to be populated with both
/// parties' signatures.
pub fn build_close_transaction(
    funding_outpoint: OutPoint,
    local_txout: Option<TxOut>,
    remote_txout: Option<TxOut>,
) -> Transaction {
    let input = TxIn {
        previous_output: funding_outpoint,
        script_sig: ScriptBuf::new(),
        sequence: Sequence::MAX,
        witness: Witness::new(),
    };

    let output = [local_txout, remote_txout].into_iter().flatten().collect();

    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![input],
        output,
    }
}
