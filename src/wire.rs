//! Close protocol wire messages
//!
//! The messages exchanged during the cooperative close flow, as plain typed
//! structs. Encoding and decoding live with the surrounding daemon; the state
//! machine only consumes and produces the typed forms.

use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::{Amount, ScriptBuf, Sequence};

use crate::types::ChannelId;

/// The kind of signature carried in a close offer or its reply
///
/// `CloserNoClosee` signs a transaction that omits the closee output (the
/// closee's balance is dust); `CloserAndClosee` signs a transaction that
/// includes both outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigVariant {
    /// Signature over a transaction with only the closer output manifested
    CloserNoClosee,
    /// Signature over a transaction with both outputs manifested
    CloserAndClosee,
}

/// The shutdown message that initiates (or acknowledges) the close flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shutdown {
    /// The channel being shut down
    pub channel_id: ChannelId,
    /// The script the sender wants its settled funds paid to
    pub script: ScriptBuf,
}

/// A close offer: the sender's signature at its proposed fee
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosingComplete {
    /// The channel being closed
    pub channel_id: ChannelId,
    /// The absolute fee the sender proposes to pay
    pub fee_satoshis: Amount,
    /// The input sequence the signature commits to
    pub sequence: Sequence,
    /// Signature omitting the closee output, if that output is dust
    pub closer_no_closee: Option<Signature>,
    /// Signature covering both outputs
    pub closer_and_closee: Option<Signature>,
}

/// The reply to a close offer: the receiver countersigns the offered version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosingSig {
    /// The channel being closed
    pub channel_id: ChannelId,
    /// Signature omitting the closee output, if that output is dust
    pub closer_no_closee: Option<Signature>,
    /// Signature covering both outputs
    pub closer_and_closee: Option<Signature>,
}

/// A close protocol wire message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A shutdown request or acknowledgement
    Shutdown(Shutdown),
    /// A close offer carrying the offerer's signature
    ClosingComplete(ClosingComplete),
    /// A countersignature for a previously sent offer
    ClosingSig(ClosingSig),
}

impl Message {
    /// The channel the message belongs to
    pub fn channel_id(&self) -> ChannelId {
        match self {
            Message::Shutdown(m) => m.channel_id,
            Message::ClosingComplete(m) => m.channel_id,
            Message::ClosingSig(m) => m.channel_id,
        }
    }
}

fn count_sigs(no_closee: &Option<Signature>, and_closee: &Option<Signature>) -> usize {
    no_closee.iter().count() + and_closee.iter().count()
}

fn pick_sig(
    no_closee: &Option<Signature>,
    and_closee: &Option<Signature>,
) -> Option<(SigVariant, Signature)> {
    match (no_closee, and_closee) {
        (Some(sig), None) => Some((SigVariant::CloserNoClosee, *sig)),
        (None, Some(sig)) => Some((SigVariant::CloserAndClosee, *sig)),
        _ => None,
    }
}

impl ClosingComplete {
    /// Number of signatures attached to the offer
    pub fn num_sigs(&self) -> usize {
        count_sigs(&self.closer_no_closee, &self.closer_and_closee)
    }

    /// The single carried signature and its variant, if exactly one is present
    pub fn signature(&self) -> Option<(SigVariant, Signature)> {
        pick_sig(&self.closer_no_closee, &self.closer_and_closee)
    }
}

impl ClosingSig {
    /// Number of signatures attached to the reply
    pub fn num_sigs(&self) -> usize {
        count_sigs(&self.closer_no_closee, &self.closer_and_closee)
    }

    /// The single carried signature and its variant, if exactly one is present
    pub fn signature(&self) -> Option<(SigVariant, Signature)> {
        pick_sig(&self.closer_no_closee, &self.closer_and_closee)
    }
}
