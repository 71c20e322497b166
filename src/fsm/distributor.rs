//! Multi-subscriber fan-out of state transitions
//!
//! The driver publishes every committed state through an
//! [`EventDistributor`]. Each subscriber owns a bounded queue; publishing is
//! non-blocking per subscriber, so one slow consumer can never stall the
//! driver. On overflow the oldest queued state is dropped, so a lagging
//! subscriber sees a gappy but still monotone history.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

/// Default capacity of a subscriber's queue
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 10;

struct SubscriberQueue<S> {
    buf: Mutex<VecDeque<S>>,
    notify: Notify,
    closed: AtomicBool,
}

impl<S> SubscriberQueue<S> {
    fn new() -> Self {
        Self {
            buf: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn push(&self, item: S, capacity: usize) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }

        {
            let mut buf = self.buf.lock().expect("subscriber queue poisoned");
            if buf.len() >= capacity {
                // Drop the oldest snapshot rather than stall the publisher.
                buf.pop_front();
            }
            buf.push_back(item);
        }

        self.notify.notify_one();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}

/// An active subscription to state transitions
///
/// Receives every committed state in commit order, subject to the bounded
/// queue's drop-oldest overflow policy.
pub struct StateSubscriber<S> {
    id: u64,
    queue: Arc<SubscriberQueue<S>>,
}

impl<S> StateSubscriber<S> {
    /// Receive the next published state
    ///
    /// Returns `None` once the subscription has been removed or the machine
    /// has stopped publishing, and the queue is drained.
    pub async fn recv(&mut self) -> Option<S> {
        loop {
            let notified = self.queue.notify.notified();

            if let Some(state) = self
                .queue
                .buf
                .lock()
                .expect("subscriber queue poisoned")
                .pop_front()
            {
                return Some(state);
            }

            if self.queue.closed.load(Ordering::Acquire) {
                return None;
            }

            notified.await;
        }
    }
}

/// A multi-producer, multi-consumer publish mechanism for state transitions
pub struct EventDistributor<S> {
    subscribers: Mutex<HashMap<u64, Arc<SubscriberQueue<S>>>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl<S> Default for EventDistributor<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> EventDistributor<S> {
    /// Create a distributor whose subscribers buffer up to
    /// [`DEFAULT_SUBSCRIBER_CAPACITY`] states
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }

    /// Create a distributor with a custom per-subscriber queue capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            capacity: capacity.max(1),
        }
    }

    /// Register a new subscriber
    pub fn register_subscriber(&self) -> StateSubscriber<S> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(SubscriberQueue::new());

        self.subscribers
            .lock()
            .expect("subscriber registry poisoned")
            .insert(id, Arc::clone(&queue));

        StateSubscriber { id, queue }
    }

    /// Remove a subscriber, closing its queue
    ///
    /// Removal is idempotent and safe concurrently with publication.
    pub fn remove_subscriber(&self, sub: &StateSubscriber<S>) {
        let removed = self
            .subscribers
            .lock()
            .expect("subscriber registry poisoned")
            .remove(&sub.id);

        if let Some(queue) = removed {
            queue.close();
        }
    }

    /// Number of active subscribers
    pub fn num_subscribers(&self) -> usize {
        self.subscribers
            .lock()
            .expect("subscriber registry poisoned")
            .len()
    }

    /// Close every subscriber queue, ending all subscriptions
    pub fn close(&self) {
        let drained: Vec<_> = self
            .subscribers
            .lock()
            .expect("subscriber registry poisoned")
            .drain()
            .collect();

        for (_, queue) in drained {
            queue.close();
        }
    }
}

impl<S: Clone> EventDistributor<S> {
    /// Publish a committed state to every subscriber
    ///
    /// Never blocks: each subscriber's queue either accepts the state or
    /// drops its oldest entry to make room.
    pub fn publish(&self, state: S) {
        let queues: Vec<_> = self
            .subscribers
            .lock()
            .expect("subscriber registry poisoned")
            .values()
            .cloned()
            .collect();

        for queue in queues {
            queue.push(state.clone(), self.capacity);
        }
    }
}
