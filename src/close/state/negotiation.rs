//! ClosingNegotiation state
//!
//! The negotiation super-state owns two independent sub-states, one for each
//! side of the channel, because either side may drive an RBF iteration
//! independently. Events are routed to whichever sub-state claims them:
//! remote-first for incoming offers, local-first for our own offer and
//! signature events.

use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::{Amount, FeeRate};

use crate::close::events::CloseEvent;
use crate::close::terms::CloseChannelTerms;

/// The local side is ready to kick off a signing round
///
/// A self-emitted `SendOffer` event moves the local sub-state to
/// `LocalOfferSent`, producing our `ClosingComplete` offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalCloseStart {
    /// The terms the local offer will be priced under
    pub terms: CloseChannelTerms,
}

/// Our offer is out; waiting for the remote countersignature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalOfferSent {
    /// The terms the offer was priced under
    pub terms: CloseChannelTerms,

    /// The absolute fee we proposed
    pub proposed_fee: Amount,

    /// The fee rate we proposed
    pub proposed_fee_rate: FeeRate,

    /// The signature we sent to the remote party
    pub local_sig: Signature,
}

/// The remote side may deliver an offer for us to countersign
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCloseStart {
    /// The terms an incoming offer is validated against
    pub terms: CloseChannelTerms,
}

/// The progression of the local half of the negotiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalPeerState {
    /// Ready to send an offer
    CloseStart(LocalCloseStart),
    /// Offer sent, awaiting the countersignature
    OfferSent(LocalOfferSent),
}

impl LocalPeerState {
    /// True if the local sub-state should process the target event
    pub fn should_route_to(&self, event: &CloseEvent) -> bool {
        match self {
            LocalPeerState::CloseStart(_) => matches!(event, CloseEvent::SendOffer { .. }),
            LocalPeerState::OfferSent(_) => matches!(event, CloseEvent::LocalSigReceived { .. }),
        }
    }

    /// The terms this sub-state negotiates under
    pub fn terms(&self) -> &CloseChannelTerms {
        match self {
            LocalPeerState::CloseStart(state) => &state.terms,
            LocalPeerState::OfferSent(state) => &state.terms,
        }
    }
}

impl RemoteCloseStart {
    /// True if the remote sub-state should process the target event
    pub fn should_route_to(&self, event: &CloseEvent) -> bool {
        matches!(event, CloseEvent::OfferReceived { .. })
    }
}

/// Both halves of the negotiation, treated as a single state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DualPeerState {
    /// The state of the local party's half-protocol
    pub local: LocalPeerState,

    /// The state of the remote party's half-protocol
    pub remote: RemoteCloseStart,
}

/// The negotiation super-state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosingNegotiation {
    /// The composite per-side state events are routed into
    pub peer_state: DualPeerState,
}

impl ClosingNegotiation {
    /// Build the negotiation entry state from freshly derived terms
    pub fn new(terms: CloseChannelTerms) -> Self {
        Self {
            peer_state: DualPeerState {
                local: LocalPeerState::CloseStart(LocalCloseStart {
                    terms: terms.clone(),
                }),
                remote: RemoteCloseStart { terms },
            },
        }
    }
}
