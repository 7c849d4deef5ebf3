//! Topic - subscribers and pending envelopes for one channel
//!
//! Everything mutable about a topic sits behind a single lock so that a
//! drain's subscriber snapshot and its queue pop always see the same state.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use relay_types::{
    Envelope, Payload, Priority, Subscription, SubscriptionId, TopicInfo, TopicStats,
};
use tokio::sync::Notify;

/// State guarded by the topic lock
struct TopicState {
    /// Subscriptions in registration order
    subscriptions: Vec<Subscription>,
    /// Pending envelopes, lowest `(priority, sequence)` on top
    queue: BinaryHeap<Reverse<Envelope>>,
    /// Sequence assigned to the next publish
    next_sequence: u64,
    /// Whether a drain task is running for this topic
    draining: bool,
}

/// Result of enqueueing an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enqueued {
    /// Sequence number assigned to the envelope
    pub sequence: u64,
    /// The caller must start the drain task
    pub start_drain: bool,
}

/// A named channel
pub struct Topic {
    info: TopicInfo,
    state: Mutex<TopicState>,
    /// Signalled whenever a drain finishes
    idle: Notify,
    /// Serializes replays of this topic
    replay_lock: tokio::sync::Mutex<()>,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            info: TopicInfo::new(name),
            state: Mutex::new(TopicState {
                subscriptions: Vec::new(),
                queue: BinaryHeap::new(),
                next_sequence: 0,
                draining: false,
            }),
            idle: Notify::new(),
            replay_lock: tokio::sync::Mutex::new(()),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn info(&self) -> &TopicInfo {
        &self.info
    }

    /// Register a subscription
    pub fn subscribe(&self, subscription: Subscription) -> SubscriptionId {
        let id = subscription.id;
        self.state.lock().subscriptions.push(subscription);
        id
    }

    /// Queue a payload and claim the drain if none is running.
    ///
    /// When `start_drain` comes back true the caller owns the drain and must
    /// run it; otherwise the running drain will pick the envelope up.
    pub fn enqueue(&self, priority: Priority, payload: Payload) -> Enqueued {
        let mut state = self.state.lock();

        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state
            .queue
            .push(Reverse(Envelope::new(priority, sequence, payload)));

        let start_drain = !state.draining;
        state.draining = true;

        Enqueued {
            sequence,
            start_drain,
        }
    }

    /// Pop the next envelope together with the current subscribers.
    ///
    /// Returns `None` once the queue is empty, releasing the drain in the same
    /// critical section so no enqueue can slip between the check and the exit.
    pub fn next_delivery(&self) -> Option<(Envelope, Vec<Subscription>)> {
        let mut state = self.state.lock();

        match state.queue.pop() {
            Some(Reverse(envelope)) => Some((envelope, state.subscriptions.clone())),
            None => {
                state.draining = false;
                drop(state);
                self.idle.notify_waiters();
                None
            }
        }
    }

    /// No pending envelopes and no drain running
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        !state.draining && state.queue.is_empty()
    }

    /// Wait until the topic is idle
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    pub(crate) fn replay_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.replay_lock
    }

    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// In-memory statistics (`has_undelivered` is left to the broker)
    pub fn stats(&self) -> TopicStats {
        let state = self.state.lock();
        TopicStats {
            subscriber_count: state.subscriptions.len() as u64,
            pending_count: state.queue.len() as u64,
            published_count: state.next_sequence,
            delivered_count: self.delivered.load(Ordering::Relaxed),
            failed_count: self.failed.load(Ordering::Relaxed),
            draining: state.draining,
            has_undelivered: false,
        }
    }
}
