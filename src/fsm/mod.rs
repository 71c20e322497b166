//! Protocol state machine runtime
//!
//! A reusable driver for protocol state machines. States are pure values: a
//! transition maps `(event, environment)` to a new state plus an optional
//! emission, and requests all I/O by describing it as [`DaemonEffect`] values
//! which the driver executes through a [`DaemonAdapters`] implementation.
//!
//! # Structure
//!
//! - `machine`: the driver loop, effect execution, lifecycle
//! - `daemon`: effect descriptions and the I/O adapter boundary
//! - `distributor`: multi-subscriber fan-out of committed state transitions

pub mod daemon;
pub mod distributor;
pub mod machine;

pub use daemon::{
    ConfDetail, ConfNtfn, DaemonAdapters, DaemonEffect, RegisterConfEffect, RegisterSpendEffect,
    SendMsgEffect, SendPredicate, SpendDetail, SpendNtfn,
};
pub use distributor::{EventDistributor, StateSubscriber, DEFAULT_SUBSCRIBER_CAPACITY};
pub use machine::{StateMachine, StateMachineCfg, POLL_INTERVAL, STATE_QUERY_TIMEOUT};

use crate::errors::{Error, Result};
use crate::wire;

/// An abstract protocol state
///
/// A state knows how to process an event against an environment, yielding a
/// transition to a new state, and whether it is terminal. Transition
/// functions must be pure with respect to the driver: all I/O is requested
/// through the emitted [`DaemonEffect`] values.
pub trait State: Sized {
    /// The event family this state family consumes and emits
    type Event;

    /// The immutable dependency bundle transitions consult
    type Env;

    /// Process a single event, yielding the transition to take
    ///
    /// This will be called iteratively by the driver until the internal
    /// event queue drains or an error is returned.
    fn process_event(&self, event: Self::Event, env: &Self::Env) -> Result<Transition<Self>>;

    /// Whether this state is terminal
    ///
    /// Terminal detection happens only on the state left standing once a
    /// burst of internal events has drained.
    fn is_terminal(&self) -> bool;
}

/// The result of processing one event: the next state and what it emitted
pub struct Transition<S: State> {
    /// The state to commit
    pub next_state: S,

    /// The set of events to emit, if any
    pub new_events: Option<Emission<S::Event>>,
}

impl<S: State> std::fmt::Debug for Transition<S>
where
    S: std::fmt::Debug,
    S::Event: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transition")
            .field("next_state", &self.next_state)
            .field("new_events", &self.new_events)
            .finish()
    }
}

/// Events emitted by a state transition
///
/// The internal/external distinction is load-bearing: internal events are
/// re-fed into the same state machine synchronously within the current
/// burst, while external effects cross the I/O boundary.
#[derive(Debug)]
pub struct Emission<Ev> {
    /// An event routed back into the state machine within the same burst
    pub internal: Option<Ev>,

    /// Effects handed to the daemon adapter, executed in emission order
    pub external: Option<Vec<DaemonEffect<Ev>>>,
}

impl<Ev> Emission<Ev> {
    /// An emission carrying a single internal event
    pub fn internal(event: Ev) -> Self {
        Self {
            internal: Some(event),
            external: None,
        }
    }

    /// An emission carrying external effects only
    pub fn external(effects: Vec<DaemonEffect<Ev>>) -> Self {
        Self {
            internal: None,
            external: Some(effects),
        }
    }
}

/// The environment a state machine executes against
///
/// An opaque bundle of dependencies held for the lifetime of one machine.
/// The driver itself only needs a stable identity for logging and the
/// cleanup hook invoked at terminal states.
pub trait Environment: Send + Sync + 'static {
    /// A stable name that uniquely identifies this machine's environment
    fn name(&self) -> String;

    /// Invoked once the state machine reaches a terminal state
    fn cleanup(&self) -> Result<()>;
}

/// Sink for errors that occur during state machine execution
pub trait ErrorReporter: Send + Sync {
    /// Report an error that occurred while driving the state machine
    fn report_error(&self, err: Error);
}

/// Optional hook translating wire messages into typed protocol events
///
/// Lets a state machine be fed untranslated wire traffic by a surrounding
/// dispatcher. A machine without a mapper only accepts typed events.
pub trait MsgMapper: Send + Sync {
    /// The event family produced by this mapper
    type Event;

    /// Map a wire message to a protocol event, if this machine handles it
    fn map_msg(&self, msg: &wire::Message) -> Option<Self::Event>;
}
