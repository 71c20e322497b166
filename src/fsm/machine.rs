//! The state machine driver
//!
//! One long-lived driver task per machine owns all state mutation. It
//! selects among external events, state queries, and the shutdown signal,
//! and burst-processes each external event together with every internal
//! event it cascades into before accepting the next one. Auxiliary tasks
//! (predicate pollers, notification waiters, post-send dispatchers) are
//! short-lived, select on the shared shutdown token, and communicate back
//! exclusively by enqueueing events.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::errors::{FsmError, Result};
use crate::fsm::daemon::{
    DaemonAdapters, DaemonEffect, RegisterConfEffect, RegisterSpendEffect, SendMsgEffect,
};
use crate::fsm::distributor::{EventDistributor, StateSubscriber};
use crate::fsm::{Environment, ErrorReporter, MsgMapper, State};
use crate::wire;

/// The interval at which a `send_when` predicate is polled
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The bounded wait imposed on a state query
pub const STATE_QUERY_TIMEOUT: Duration = Duration::from_secs(1);

/// Configuration used to create a new state machine
pub struct StateMachineCfg<S: State> {
    /// Sink for errors that occur during state transitions
    pub error_reporter: Arc<dyn ErrorReporter>,

    /// The adapters bridging the machine to the daemon
    pub daemon: Arc<dyn DaemonAdapters>,

    /// The state the machine starts in
    pub initial_state: S,

    /// The environment the machine executes against
    pub env: Arc<S::Env>,

    /// An optional effect executed once at startup, before the initial state
    /// is published
    ///
    /// This can be used to set up tracking state such as a spend or
    /// confirmation watch.
    pub init_effect: Option<DaemonEffect<S::Event>>,

    /// Optional hook mapping wire messages into protocol events
    pub msg_mapper: Option<Arc<dyn MsgMapper<Event = S::Event>>>,
}

struct StateQuery<S> {
    reply: oneshot::Sender<S>,
}

struct InitParts<S: State> {
    initial_state: S,
    init_effect: Option<DaemonEffect<S::Event>>,
}

struct Inner<S: State> {
    name: String,
    error_reporter: Arc<dyn ErrorReporter>,
    daemon: Arc<dyn DaemonAdapters>,
    env: Arc<S::Env>,
    msg_mapper: Option<Arc<dyn MsgMapper<Event = S::Event>>>,

    // Consumed exactly once when the driver task starts.
    init: Mutex<Option<InitParts<S>>>,

    events_tx: mpsc::Sender<S::Event>,
    events_rx: Mutex<Option<mpsc::Receiver<S::Event>>>,
    query_tx: mpsc::Sender<StateQuery<S>>,
    query_rx: Mutex<Option<mpsc::Receiver<StateQuery<S>>>>,

    distributor: EventDistributor<S>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    started: AtomicBool,
}

/// An abstract state machine able to process incoming events and drive a
/// state graph to termination
///
/// The handle is cheap to clone; all clones refer to the same machine.
pub struct StateMachine<S: State> {
    inner: Arc<Inner<S>>,
}

impl<S: State> Clone for StateMachine<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> StateMachine<S>
where
    S: State + Clone + Send + fmt::Debug + 'static,
    S::Event: Send + fmt::Debug + 'static,
    S::Env: Environment,
{
    /// Create a new state machine from the given configuration
    ///
    /// The machine starts stopped; call [`StateMachine::start`] to spawn the
    /// driver.
    pub fn new(cfg: StateMachineCfg<S>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(1);
        let (query_tx, query_rx) = mpsc::channel(1);
        let name = cfg.env.name();

        Self {
            inner: Arc::new(Inner {
                name,
                error_reporter: cfg.error_reporter,
                daemon: cfg.daemon,
                env: cfg.env,
                msg_mapper: cfg.msg_mapper,
                init: Mutex::new(Some(InitParts {
                    initial_state: cfg.initial_state,
                    init_effect: cfg.init_effect,
                })),
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
                query_tx,
                query_rx: Mutex::new(Some(query_rx)),
                distributor: EventDistributor::new(),
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
                started: AtomicBool::new(false),
            }),
        }
    }

    /// The name of the machine's environment
    pub fn name(&self) -> String {
        self.inner.name.clone()
    }

    /// Start the state machine, spawning the driver task
    ///
    /// Idempotent: calls after the first are no-ops. A stopped machine
    /// cannot be restarted.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let events_rx = self
            .inner
            .events_rx
            .lock()
            .expect("event receiver poisoned")
            .take();
        let query_rx = self
            .inner
            .query_rx
            .lock()
            .expect("query receiver poisoned")
            .take();

        let (Some(events_rx), Some(query_rx)) = (events_rx, query_rx) else {
            return;
        };

        let inner = Arc::clone(&self.inner);
        self.inner
            .tracker
            .spawn(drive_machine(inner, events_rx, query_rx));
    }

    /// Stop the state machine
    ///
    /// Signals shutdown and blocks until the driver and every auxiliary task
    /// it spawned have exited. Idempotent.
    pub async fn stop(&self) {
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }

    /// Send a new event to the state machine
    ///
    /// Blocks until the driver accepts the event or the machine is shutting
    /// down. The event channel is bounded with capacity 1, so a caller is
    /// held until the driver has taken the previous event.
    pub async fn send_event(&self, event: S::Event) {
        debug!(fsm = %self.inner.name, event = ?event, "sending event");

        tokio::select! {
            _ = self.inner.shutdown.cancelled() => {}
            res = self.inner.events_tx.send(event) => {
                let _ = res;
            }
        }
    }

    /// Attempt to feed a wire message to the state machine
    ///
    /// If a message mapper is configured and yields an event for this
    /// message, the event is sent via [`StateMachine::send_event`] and true
    /// is returned. Otherwise false.
    pub async fn send_message(&self, msg: &wire::Message) -> bool {
        let Some(mapper) = &self.inner.msg_mapper else {
            return false;
        };

        match mapper.map_msg(msg) {
            Some(event) => {
                debug!(fsm = %self.inner.name, "mapped wire message to event");
                self.send_event(event).await;
                true
            }
            None => false,
        }
    }

    /// Whether the target message can be routed to the state machine
    pub fn can_handle(&self, msg: &wire::Message) -> bool {
        self.inner
            .msg_mapper
            .as_ref()
            .is_some_and(|mapper| mapper.map_msg(msg).is_some())
    }

    /// Query the current state of the state machine
    ///
    /// The driver answers with the last-committed state. The wait is bounded
    /// by [`STATE_QUERY_TIMEOUT`] since the driver may be mid-burst.
    pub async fn current_state(&self) -> Result<S> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let query = StateQuery { reply: reply_tx };

        tokio::select! {
            _ = self.inner.shutdown.cancelled() => {
                return Err(FsmError::ShuttingDown.into());
            }
            res = self.inner.query_tx.send(query) => {
                if res.is_err() {
                    return Err(FsmError::ShuttingDown.into());
                }
            }
        }

        match time::timeout(STATE_QUERY_TIMEOUT, reply_rx).await {
            Ok(Ok(state)) => Ok(state),
            Ok(Err(_)) => Err(FsmError::ShuttingDown.into()),
            Err(_) => Err(FsmError::StateQueryTimeout.into()),
        }
    }

    /// Register a new subscriber notified of every committed state transition
    pub fn register_subscriber(&self) -> StateSubscriber<S> {
        self.inner.distributor.register_subscriber()
    }

    /// Remove a subscriber from the set of active subscribers
    pub fn remove_subscriber(&self, sub: &StateSubscriber<S>) {
        self.inner.distributor.remove_subscriber(sub);
    }
}

/// The main event loop of the state machine
async fn drive_machine<S>(
    inner: Arc<Inner<S>>,
    mut events_rx: mpsc::Receiver<S::Event>,
    mut query_rx: mpsc::Receiver<StateQuery<S>>,
) where
    S: State + Clone + Send + fmt::Debug + 'static,
    S::Event: Send + fmt::Debug + 'static,
    S::Env: Environment,
{
    debug!(fsm = %inner.name, "starting state machine");

    let Some(init) = inner.init.lock().expect("init parts poisoned").take() else {
        return;
    };
    let mut current = init.initial_state;

    // If an init effect was specified, handle it before anything else.
    if let Some(effect) = init.init_effect {
        if let Err(err) = execute_daemon_effect(&inner, effect).await {
            error!(fsm = %inner.name, %err, "unable to execute init effect");
            inner.error_reporter.report_error(err);
            inner.shutdown.cancel();
            inner.distributor.close();
            return;
        }
    }

    // We just started driving the state machine, so notify subscribers of
    // the starting state.
    inner.distributor.publish(current.clone());

    loop {
        tokio::select! {
            // A new external event: drive the machine forward until we run
            // out of internal events or hit a terminal state.
            Some(event) = events_rx.recv() => {
                if let Err(err) = apply_events(&inner, &mut current, event).await {
                    error!(fsm = %inner.name, %err, "unable to apply event");
                    inner.error_reporter.report_error(err);

                    // The machine cannot proceed past a protocol-level
                    // inconsistency, so tear the whole thing down.
                    inner.shutdown.cancel();
                    inner.distributor.close();
                    return;
                }

                if current.is_terminal() {
                    info!(fsm = %inner.name, "reached terminal state");

                    if let Err(err) = inner.env.cleanup() {
                        error!(fsm = %inner.name, %err, "unable to clean up env");
                    }

                    inner.shutdown.cancel();
                    inner.distributor.close();
                    return;
                }
            }

            // An outside caller is querying our state.
            Some(query) = query_rx.recv() => {
                let _ = query.reply.send(current.clone());
            }

            _ = inner.shutdown.cancelled() => {
                inner.distributor.close();
                return;
            }
        }
    }
}

/// Apply a new event to the state machine, draining any internal events it
/// cascades into
///
/// Daemon effects emitted along the way are executed in emission order
/// before the next internal event is processed. Each transition is committed
/// and published before the next event is taken from the queue.
async fn apply_events<S>(inner: &Arc<Inner<S>>, current: &mut S, event: S::Event) -> Result<()>
where
    S: State + Clone + Send + fmt::Debug + 'static,
    S::Event: Send + fmt::Debug + 'static,
    S::Env: Environment,
{
    let mut queue = VecDeque::new();
    queue.push_back(event);

    while let Some(event) = queue.pop_front() {
        debug!(fsm = %inner.name, event = ?event, "processing event");

        let transition = current.process_event(event, inner.env.as_ref())?;

        if let Some(emission) = transition.new_events {
            if let Some(effects) = emission.external {
                debug!(
                    fsm = %inner.name,
                    num_effects = effects.len(),
                    "processing daemon effects",
                );

                for effect in effects {
                    execute_daemon_effect(inner, effect).await?;
                }
            }

            if let Some(internal) = emission.internal {
                debug!(
                    fsm = %inner.name,
                    event = ?internal,
                    "adding new internal event to queue",
                );
                queue.push_back(internal);
            }
        }

        info!(
            fsm = %inner.name,
            from_state = ?current,
            to_state = ?transition.next_state,
            "state transition",
        );

        *current = transition.next_state;
        inner.distributor.publish(current.clone());
    }

    Ok(())
}

/// Execute a single daemon effect emitted by a state transition
///
/// Submission is synchronous from the burst's perspective; long-running
/// follow-up work (predicate polling, notification receipt) runs in detached
/// auxiliary tasks accounted for by the machine's task tracker.
async fn execute_daemon_effect<S>(inner: &Arc<Inner<S>>, effect: DaemonEffect<S::Event>) -> Result<()>
where
    S: State + Clone + Send + fmt::Debug + 'static,
    S::Event: Send + fmt::Debug + 'static,
    S::Env: Environment,
{
    match effect {
        DaemonEffect::SendMsg(send) => execute_send_msg(inner, send).await,

        DaemonEffect::BroadcastTxn { tx, label } => {
            debug!(
                fsm = %inner.name,
                txid = %tx.compute_txid(),
                label = %label,
                "broadcasting txn",
            );
            inner.daemon.broadcast_transaction(&tx, &label).await
        }

        DaemonEffect::DisableChannel { chan_point } => {
            debug!(fsm = %inner.name, %chan_point, "disabling channel");
            inner.daemon.disable_channel(chan_point).await
        }

        DaemonEffect::RegisterSpend(spend) => {
            let RegisterSpendEffect {
                outpoint,
                pk_script,
                height_hint,
                post_spend,
            } = spend;

            debug!(fsm = %inner.name, %outpoint, "registering spend");

            let ntfn = inner
                .daemon
                .register_spend_ntfn(outpoint, pk_script, height_hint)
                .await?;

            let task_inner = Arc::clone(inner);
            inner.tracker.spawn(async move {
                tokio::select! {
                    res = ntfn.spent => {
                        if let Ok(detail) = res {
                            debug!(
                                fsm = %task_inner.name,
                                height = detail.spending_height,
                                "watched outpoint spent",
                            );
                            if let Some(event) = post_spend {
                                send_event_from_task(&task_inner, event).await;
                            }
                        }
                    }
                    _ = task_inner.shutdown.cancelled() => {}
                }
            });

            Ok(())
        }

        DaemonEffect::RegisterConf(conf) => {
            let RegisterConfEffect {
                txid,
                pk_script,
                num_confs,
                height_hint,
                post_conf,
            } = conf;

            debug!(fsm = %inner.name, txid = ?txid, "registering conf");

            let num_confs = num_confs.unwrap_or(1);
            let ntfn = inner
                .daemon
                .register_confirmations_ntfn(txid, pk_script, num_confs, height_hint)
                .await?;

            let task_inner = Arc::clone(inner);
            inner.tracker.spawn(async move {
                tokio::select! {
                    res = ntfn.confirmed => {
                        if let Ok(detail) = res {
                            debug!(
                                fsm = %task_inner.name,
                                height = detail.block_height,
                                "watched txn confirmed",
                            );
                            if let Some(event) = post_conf {
                                send_event_from_task(&task_inner, event).await;
                            }
                        }
                    }
                    _ = task_inner.shutdown.cancelled() => {}
                }
            });

            Ok(())
        }
    }
}

/// Execute a message send, minding the send predicate and post-send event
async fn execute_send_msg<S>(inner: &Arc<Inner<S>>, send: SendMsgEffect<S::Event>) -> Result<()>
where
    S: State + Clone + Send + fmt::Debug + 'static,
    S::Event: Send + fmt::Debug + 'static,
    S::Env: Environment,
{
    let SendMsgEffect {
        target_peer,
        msgs,
        send_when,
        post_send,
    } = send;

    // Without a predicate the send happens right away; the post-send event
    // re-enters through a detached task so the bounded event channel cannot
    // deadlock the driver against itself.
    let Some(predicate) = send_when else {
        debug!(fsm = %inner.name, peer = %target_peer, "sending messages");
        inner.daemon.send_messages(target_peer, msgs).await?;

        if let Some(event) = post_send {
            let task_inner = Arc::clone(inner);
            inner.tracker.spawn(async move {
                debug!(fsm = %task_inner.name, "dispatching post-send event");
                send_event_from_task(&task_inner, event).await;
            });
        }

        return Ok(());
    };

    // A predicated send polls until the predicate first yields true, then
    // performs the same send-and-dispatch sequence.
    info!(fsm = %inner.name, "waiting for send predicate to be true");

    let task_inner = Arc::clone(inner);
    inner.tracker.spawn(async move {
        let mut ticker = time::interval(POLL_INTERVAL);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !predicate() {
                        continue;
                    }

                    info!(fsm = %task_inner.name, "send active predicate");

                    match task_inner.daemon.send_messages(target_peer, msgs).await {
                        Ok(()) => {
                            if let Some(event) = post_send {
                                send_event_from_task(&task_inner, event).await;
                            }
                        }
                        Err(err) => {
                            // The driver has already moved on, so a late
                            // failure is reported without tearing down the
                            // machine.
                            warn!(fsm = %task_inner.name, %err, "unable to send messages");
                            task_inner.error_reporter.report_error(err);
                        }
                    }

                    return;
                }

                _ = task_inner.shutdown.cancelled() => return,
            }
        }
    });

    Ok(())
}

/// Re-enter the state machine from an auxiliary task, honoring shutdown
async fn send_event_from_task<S>(inner: &Arc<Inner<S>>, event: S::Event)
where
    S: State + Clone + Send + fmt::Debug + 'static,
    S::Event: Send + fmt::Debug + 'static,
    S::Env: Environment,
{
    tokio::select! {
        _ = inner.shutdown.cancelled() => {}
        res = inner.events_tx.send(event) => {
            let _ = res;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use bitcoin::absolute::LockTime;
    use bitcoin::hashes::Hash;
    use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
    use bitcoin::transaction::Version;
    use bitcoin::{OutPoint, ScriptBuf, Sequence, Transaction, TxIn, Txid, Witness};
    use tokio::sync::oneshot;

    use super::*;
    use crate::errors::{CloseError, Error};
    use crate::fsm::daemon::{ConfDetail, ConfNtfn, SpendDetail, SpendNtfn};
    use crate::fsm::{Emission, Transition};
    use crate::wire::Shutdown;
    use async_trait::async_trait;

    #[derive(Clone, Debug, PartialEq, Eq)]
    enum TestState {
        Counting { count: u32 },
        Done { count: u32 },
    }

    #[derive(Debug)]
    enum TestEvent {
        Bump,
        Chain { remaining: u32 },
        Effects(Vec<DaemonEffect<TestEvent>>),
        Finish,
        Fail,
    }

    struct TestEnv {
        cleanups: AtomicU32,
    }

    impl Environment for TestEnv {
        fn name(&self) -> String {
            "test_fsm".to_string()
        }

        fn cleanup(&self) -> Result<()> {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl State for TestState {
        type Event = TestEvent;
        type Env = TestEnv;

        fn process_event(&self, event: TestEvent, _env: &TestEnv) -> Result<Transition<Self>> {
            let count = match self {
                TestState::Counting { count } => *count,
                TestState::Done { .. } => {
                    return Err(CloseError::InvalidStateTransition {
                        state: "done",
                        event: "any",
                    }
                    .into())
                }
            };

            match event {
                TestEvent::Bump => Ok(Transition {
                    next_state: TestState::Counting { count: count + 1 },
                    new_events: None,
                }),

                TestEvent::Chain { remaining } => {
                    let new_events = (remaining > 1).then(|| {
                        Emission::internal(TestEvent::Chain {
                            remaining: remaining - 1,
                        })
                    });

                    Ok(Transition {
                        next_state: TestState::Counting { count: count + 1 },
                        new_events,
                    })
                }

                TestEvent::Effects(effects) => Ok(Transition {
                    next_state: TestState::Counting { count: count + 1 },
                    new_events: Some(Emission::external(effects)),
                }),

                TestEvent::Finish => Ok(Transition {
                    next_state: TestState::Done { count },
                    new_events: None,
                }),

                TestEvent::Fail => Err(CloseError::InvalidStateTransition {
                    state: "counting",
                    event: "fail",
                }
                .into()),
            }
        }

        fn is_terminal(&self) -> bool {
            matches!(self, TestState::Done { .. })
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Recorded {
        SendMsg { num_msgs: usize },
        Broadcast { label: String },
        Disable { chan_point: OutPoint },
        RegisterSpend { outpoint: OutPoint },
        RegisterConf { num_confs: u32 },
    }

    #[derive(Default)]
    struct RecordingAdapter {
        calls: Mutex<Vec<Recorded>>,
        spend_senders: Mutex<Vec<oneshot::Sender<SpendDetail>>>,
        conf_senders: Mutex<Vec<oneshot::Sender<ConfDetail>>>,
        fail_sends: AtomicBool,
    }

    impl RecordingAdapter {
        fn calls(&self) -> Vec<Recorded> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DaemonAdapters for RecordingAdapter {
        async fn send_messages(&self, _peer: PublicKey, msgs: Vec<wire::Message>) -> Result<()> {
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(crate::errors::DaemonError::SendMessages("peer gone".into()).into());
            }
            self.calls.lock().unwrap().push(Recorded::SendMsg {
                num_msgs: msgs.len(),
            });
            Ok(())
        }

        async fn broadcast_transaction(&self, _tx: &Transaction, label: &str) -> Result<()> {
            self.calls.lock().unwrap().push(Recorded::Broadcast {
                label: label.to_string(),
            });
            Ok(())
        }

        async fn disable_channel(&self, chan_point: OutPoint) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(Recorded::Disable { chan_point });
            Ok(())
        }

        async fn register_confirmations_ntfn(
            &self,
            _txid: Option<Txid>,
            _pk_script: ScriptBuf,
            num_confs: u32,
            _height_hint: u32,
        ) -> Result<ConfNtfn> {
            self.calls
                .lock()
                .unwrap()
                .push(Recorded::RegisterConf { num_confs });

            let (tx, rx) = oneshot::channel();
            self.conf_senders.lock().unwrap().push(tx);
            Ok(ConfNtfn { confirmed: rx })
        }

        async fn register_spend_ntfn(
            &self,
            outpoint: OutPoint,
            _pk_script: ScriptBuf,
            _height_hint: u32,
        ) -> Result<SpendNtfn> {
            self.calls
                .lock()
                .unwrap()
                .push(Recorded::RegisterSpend { outpoint });

            let (tx, rx) = oneshot::channel();
            self.spend_senders.lock().unwrap().push(tx);
            Ok(SpendNtfn { spent: rx })
        }
    }

    #[derive(Default)]
    struct RecordingReporter {
        errors: Mutex<Vec<Error>>,
    }

    impl ErrorReporter for RecordingReporter {
        fn report_error(&self, err: Error) {
            self.errors.lock().unwrap().push(err);
        }
    }

    struct BumpMapper;

    impl MsgMapper for BumpMapper {
        type Event = TestEvent;

        fn map_msg(&self, msg: &wire::Message) -> Option<TestEvent> {
            match msg {
                wire::Message::Shutdown(_) => Some(TestEvent::Bump),
                _ => None,
            }
        }
    }

    struct Harness {
        machine: StateMachine<TestState>,
        adapter: Arc<RecordingAdapter>,
        reporter: Arc<RecordingReporter>,
        env: Arc<TestEnv>,
    }

    fn new_harness(with_mapper: bool) -> Harness {
        let adapter = Arc::new(RecordingAdapter::default());
        let reporter = Arc::new(RecordingReporter::default());
        let env = Arc::new(TestEnv {
            cleanups: AtomicU32::new(0),
        });

        let machine = StateMachine::new(StateMachineCfg {
            error_reporter: Arc::clone(&reporter) as Arc<dyn ErrorReporter>,
            daemon: Arc::clone(&adapter) as Arc<dyn DaemonAdapters>,
            initial_state: TestState::Counting { count: 0 },
            env: Arc::clone(&env),
            init_effect: None,
            msg_mapper: with_mapper.then(|| Arc::new(BumpMapper) as Arc<dyn MsgMapper<Event = TestEvent>>),
        });

        Harness {
            machine,
            adapter,
            reporter,
            env,
        }
    }

    fn test_peer() -> PublicKey {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[9u8; 32]).expect("valid secret key");
        PublicKey::from_secret_key(&secp, &sk)
    }

    fn test_tx() -> Transaction {
        Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![],
        }
    }

    fn shutdown_msg() -> wire::Message {
        wire::Message::Shutdown(Shutdown {
            channel_id: [1u8; 32],
            script: ScriptBuf::new(),
        })
    }

    async fn wait_for_count(machine: &StateMachine<TestState>, want: u32) {
        let deadline = time::Instant::now() + Duration::from_secs(5);
        loop {
            if let Ok(TestState::Counting { count }) = machine.current_state().await {
                if count == want {
                    return;
                }
            }
            assert!(time::Instant::now() < deadline, "timed out waiting for count {want}");
            time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let h = new_harness(false);

        h.machine.start();
        h.machine.start();

        h.machine.send_event(TestEvent::Bump).await;
        wait_for_count(&h.machine, 1).await;

        h.machine.stop().await;
        h.machine.stop().await;

        // Sends against a stopped machine return without blocking.
        h.machine.send_event(TestEvent::Bump).await;
        assert!(matches!(
            h.machine.current_state().await,
            Err(Error::Fsm(FsmError::ShuttingDown))
        ));
    }

    #[tokio::test]
    async fn events_fold_in_submission_order() {
        let h = new_harness(false);
        let mut sub = h.machine.register_subscriber();

        h.machine.start();

        for _ in 0..3 {
            h.machine.send_event(TestEvent::Bump).await;
        }
        wait_for_count(&h.machine, 3).await;

        // The initial state, then every committed transition, in order.
        for want in 0..=3 {
            assert_eq!(sub.recv().await, Some(TestState::Counting { count: want }));
        }

        h.machine.stop().await;
    }

    #[tokio::test]
    async fn internal_burst_commits_every_step_in_order() {
        let h = new_harness(false);
        let mut sub = h.machine.register_subscriber();

        h.machine.start();
        h.machine.send_event(TestEvent::Chain { remaining: 3 }).await;
        wait_for_count(&h.machine, 3).await;

        for want in 0..=3 {
            assert_eq!(sub.recv().await, Some(TestState::Counting { count: want }));
        }

        h.machine.stop().await;
    }

    #[tokio::test]
    async fn effects_execute_in_emission_order() {
        let h = new_harness(false);
        let chan_point = OutPoint::new(Txid::all_zeros(), 7);

        h.machine.start();

        h.machine
            .send_event(TestEvent::Effects(vec![
                DaemonEffect::SendMsg(SendMsgEffect {
                    target_peer: test_peer(),
                    msgs: vec![shutdown_msg()],
                    send_when: None,
                    post_send: None,
                }),
                DaemonEffect::DisableChannel { chan_point },
                DaemonEffect::BroadcastTxn {
                    tx: test_tx(),
                    label: "first".to_string(),
                },
            ]))
            .await;
        h.machine
            .send_event(TestEvent::Effects(vec![DaemonEffect::BroadcastTxn {
                tx: test_tx(),
                label: "second".to_string(),
            }]))
            .await;
        wait_for_count(&h.machine, 2).await;

        assert_eq!(
            h.adapter.calls(),
            vec![
                Recorded::SendMsg { num_msgs: 1 },
                Recorded::Disable { chan_point },
                Recorded::Broadcast {
                    label: "first".to_string()
                },
                Recorded::Broadcast {
                    label: "second".to_string()
                },
            ],
        );

        h.machine.stop().await;
    }

    #[tokio::test]
    async fn terminal_state_runs_cleanup_once_and_exits() {
        let h = new_harness(false);
        let mut sub = h.machine.register_subscriber();

        h.machine.start();
        h.machine.send_event(TestEvent::Bump).await;
        h.machine.send_event(TestEvent::Finish).await;

        // The terminal state is published before the machine exits, and the
        // subscription ends afterwards.
        assert_eq!(sub.recv().await, Some(TestState::Counting { count: 0 }));
        assert_eq!(sub.recv().await, Some(TestState::Counting { count: 1 }));
        assert_eq!(sub.recv().await, Some(TestState::Done { count: 1 }));
        assert_eq!(sub.recv().await, None);

        h.machine.stop().await;
        assert_eq!(h.env.cleanups.load(Ordering::SeqCst), 1);
        assert!(h.reporter.errors.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn transition_error_reports_and_shuts_down() {
        let h = new_harness(false);
        let mut sub = h.machine.register_subscriber();

        h.machine.start();
        h.machine.send_event(TestEvent::Fail).await;

        // Only the initial state was ever published; the receiver closes.
        assert_eq!(sub.recv().await, Some(TestState::Counting { count: 0 }));
        assert_eq!(sub.recv().await, None);

        h.machine.stop().await;

        let errors = h.reporter.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0],
            Error::Close(CloseError::InvalidStateTransition { .. })
        ));
        drop(errors);

        // No cleanup on an error-induced shutdown.
        assert_eq!(h.env.cleanups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_effect_submission_is_fatal() {
        let h = new_harness(false);
        h.adapter.fail_sends.store(true, Ordering::SeqCst);
        let mut sub = h.machine.register_subscriber();

        h.machine.start();
        h.machine
            .send_event(TestEvent::Effects(vec![DaemonEffect::SendMsg(
                SendMsgEffect {
                    target_peer: test_peer(),
                    msgs: vec![shutdown_msg()],
                    send_when: None,
                    post_send: None,
                },
            )]))
            .await;

        // The effect fails before the transition commits, so only the
        // initial state is ever published and the machine tears down.
        assert_eq!(sub.recv().await, Some(TestState::Counting { count: 0 }));
        assert_eq!(sub.recv().await, None);

        h.machine.stop().await;

        let errors = h.reporter.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], Error::Daemon(_)));
    }

    #[tokio::test]
    async fn mapper_fidelity() {
        let with_mapper = new_harness(true);
        with_mapper.machine.start();

        let handled = shutdown_msg();
        let unhandled = wire::Message::ClosingSig(wire::ClosingSig {
            channel_id: [1u8; 32],
            closer_no_closee: None,
            closer_and_closee: None,
        });

        assert!(with_mapper.machine.can_handle(&handled));
        assert!(with_mapper.machine.send_message(&handled).await);
        assert!(!with_mapper.machine.can_handle(&unhandled));
        assert!(!with_mapper.machine.send_message(&unhandled).await);

        wait_for_count(&with_mapper.machine, 1).await;
        with_mapper.machine.stop().await;

        // A machine with no mapper handles nothing.
        let without_mapper = new_harness(false);
        without_mapper.machine.start();
        assert!(!without_mapper.machine.can_handle(&handled));
        assert!(!without_mapper.machine.send_message(&handled).await);
        without_mapper.machine.stop().await;
    }

    #[tokio::test]
    async fn post_send_event_reenters_machine() {
        let h = new_harness(false);
        h.machine.start();

        h.machine
            .send_event(TestEvent::Effects(vec![DaemonEffect::SendMsg(
                SendMsgEffect {
                    target_peer: test_peer(),
                    msgs: vec![shutdown_msg()],
                    send_when: None,
                    post_send: Some(TestEvent::Bump),
                },
            )]))
            .await;

        // One count for the effects event, one for the post-send bump.
        wait_for_count(&h.machine, 2).await;
        h.machine.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn predicated_send_polls_until_true() {
        let h = new_harness(false);
        let gate = Arc::new(AtomicBool::new(false));

        h.machine.start();

        let pred_gate = Arc::clone(&gate);
        h.machine
            .send_event(TestEvent::Effects(vec![DaemonEffect::SendMsg(
                SendMsgEffect {
                    target_peer: test_peer(),
                    msgs: vec![shutdown_msg()],
                    send_when: Some(Arc::new(move || pred_gate.load(Ordering::SeqCst))),
                    post_send: Some(TestEvent::Bump),
                },
            )]))
            .await;
        wait_for_count(&h.machine, 1).await;

        // At least three poll intervals with the predicate false: no send.
        time::sleep(Duration::from_millis(350)).await;
        assert!(h.adapter.calls().is_empty());

        // Once flipped, the send lands within two poll intervals and the
        // post-send event re-enters the machine.
        gate.store(true, Ordering::SeqCst);
        time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.adapter.calls(), vec![Recorded::SendMsg { num_msgs: 1 }]);
        wait_for_count(&h.machine, 2).await;

        h.machine.stop().await;
    }

    #[tokio::test]
    async fn spend_ntfn_reenters_machine() {
        let h = new_harness(false);
        let outpoint = OutPoint::new(Txid::all_zeros(), 0);

        h.machine.start();
        h.machine
            .send_event(TestEvent::Effects(vec![DaemonEffect::RegisterSpend(
                RegisterSpendEffect {
                    outpoint,
                    pk_script: ScriptBuf::new(),
                    height_hint: 100,
                    post_spend: Some(TestEvent::Bump),
                },
            )]))
            .await;
        wait_for_count(&h.machine, 1).await;

        let sender = h.adapter.spend_senders.lock().unwrap().pop().unwrap();
        sender
            .send(SpendDetail {
                spending_tx: test_tx(),
                spending_height: 800_000,
            })
            .unwrap();

        wait_for_count(&h.machine, 2).await;
        h.machine.stop().await;
    }

    #[tokio::test]
    async fn conf_ntfn_defaults_to_one_conf_and_reenters() {
        let h = new_harness(false);

        h.machine.start();
        h.machine
            .send_event(TestEvent::Effects(vec![DaemonEffect::RegisterConf(
                RegisterConfEffect {
                    txid: Some(Txid::all_zeros()),
                    pk_script: ScriptBuf::new(),
                    num_confs: None,
                    height_hint: 100,
                    post_conf: Some(TestEvent::Bump),
                },
            )]))
            .await;
        wait_for_count(&h.machine, 1).await;

        assert_eq!(h.adapter.calls(), vec![Recorded::RegisterConf { num_confs: 1 }]);

        let sender = h.adapter.conf_senders.lock().unwrap().pop().unwrap();
        sender
            .send(ConfDetail {
                block_height: 800_001,
            })
            .unwrap();

        wait_for_count(&h.machine, 2).await;
        h.machine.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn no_adapter_calls_after_stop() {
        let h = new_harness(false);
        let gate = Arc::new(AtomicBool::new(false));

        h.machine.start();

        let pred_gate = Arc::clone(&gate);
        h.machine
            .send_event(TestEvent::Effects(vec![DaemonEffect::SendMsg(
                SendMsgEffect {
                    target_peer: test_peer(),
                    msgs: vec![shutdown_msg()],
                    send_when: Some(Arc::new(move || pred_gate.load(Ordering::SeqCst))),
                    post_send: None,
                },
            )]))
            .await;
        wait_for_count(&h.machine, 1).await;

        // Stopping joins the poller; flipping the predicate afterwards must
        // not produce a send for any schedule.
        h.machine.stop().await;
        gate.store(true, Ordering::SeqCst);
        time::sleep(Duration::from_secs(1)).await;

        assert!(h.adapter.calls().is_empty());
    }

    #[tokio::test]
    async fn init_effect_runs_before_initial_publish() {
        let adapter = Arc::new(RecordingAdapter::default());
        let reporter = Arc::new(RecordingReporter::default());
        let env = Arc::new(TestEnv {
            cleanups: AtomicU32::new(0),
        });
        let outpoint = OutPoint::new(Txid::all_zeros(), 1);

        let machine = StateMachine::new(StateMachineCfg {
            error_reporter: reporter as Arc<dyn ErrorReporter>,
            daemon: Arc::clone(&adapter) as Arc<dyn DaemonAdapters>,
            initial_state: TestState::Counting { count: 0 },
            env,
            init_effect: Some(DaemonEffect::RegisterSpend(RegisterSpendEffect {
                outpoint,
                pk_script: ScriptBuf::new(),
                height_hint: 1,
                post_spend: None,
            })),
            msg_mapper: None,
        });

        let mut sub = machine.register_subscriber();
        machine.start();

        // The initial publish only happens after the init effect ran.
        assert_eq!(sub.recv().await, Some(TestState::Counting { count: 0 }));
        assert_eq!(adapter.calls(), vec![Recorded::RegisterSpend { outpoint }]);

        machine.stop().await;
    }
}
