//! Delivery engine - drains a topic's queue into its subscribers
//!
//! Failures are isolated per subscriber: a failing filter or callback only
//! produces an undelivered record, the drain itself always runs to completion.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use relay_storage::UndeliveredLog;
use relay_types::{DeliveryError, Envelope, Payload, Subscription};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::topic::Topic;

/// Outcome of offering a payload to one subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Callback ran and succeeded
    Delivered,
    /// Filter rejected the payload
    Filtered,
    /// Filter or callback failed
    Failed(DeliveryError),
}

/// Runs drains and records failed deliveries
#[derive(Clone)]
pub struct DeliveryEngine {
    log: Arc<dyn UndeliveredLog>,
}

impl DeliveryEngine {
    pub fn new(log: Arc<dyn UndeliveredLog>) -> Self {
        Self { log }
    }

    /// Run a drain for `topic` on the runtime
    ///
    /// Only call this after [`Topic::enqueue`] handed out the drain.
    pub fn spawn_drain(&self, topic: Arc<Topic>) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move { engine.drain(&topic).await })
    }

    /// Deliver pending envelopes until the queue is empty
    pub async fn drain(&self, topic: &Topic) {
        debug!(topic = %topic.name(), "Drain started");

        let mut count = 0u64;
        while let Some((envelope, subscribers)) = topic.next_delivery() {
            self.deliver(topic, &envelope, &subscribers).await;
            count += 1;
        }

        debug!(topic = %topic.name(), envelopes = count, "Drain finished");
    }

    async fn deliver(&self, topic: &Topic, envelope: &Envelope, subscribers: &[Subscription]) {
        for subscription in subscribers {
            match offer(subscription, &envelope.payload) {
                Outcome::Delivered => {
                    topic.record_delivered();
                    debug!(
                        topic = %topic.name(),
                        subscription = %subscription.label(),
                        sequence = envelope.sequence,
                        priority = envelope.priority,
                        "Message delivered"
                    );
                }
                Outcome::Filtered => {}
                Outcome::Failed(err) => {
                    topic.record_failed();
                    warn!(
                        topic = %topic.name(),
                        subscription = %subscription.label(),
                        sequence = envelope.sequence,
                        error = %err,
                        "Delivery failed"
                    );
                    self.record_undelivered(topic.name(), &envelope.payload)
                        .await;
                }
            }
        }
    }

    async fn record_undelivered(&self, topic: &str, payload: &Payload) {
        if let Err(e) = self.log.append(topic, payload).await {
            // The message is lost at this point.
            error!(
                topic = %topic,
                payload = %payload,
                error = %e,
                "Failed to persist undelivered message"
            );
        }
    }
}

/// Filter then invoke, turning errors and panics into [`Outcome::Failed`]
pub fn offer(subscription: &Subscription, payload: &Payload) -> Outcome {
    let result = catch_unwind(AssertUnwindSafe(|| {
        if !subscription.accepts(payload) {
            return Ok(false);
        }
        subscription.deliver(payload).map(|()| true)
    }));

    match result {
        Ok(Ok(true)) => Outcome::Delivered,
        Ok(Ok(false)) => Outcome::Filtered,
        Ok(Err(err)) => Outcome::Failed(err),
        Err(panic) => Outcome::Failed(DeliveryError::new(format!(
            "subscriber panicked: {}",
            panic_message(panic.as_ref())
        ))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use relay_storage::MemoryLog;
    use serde_json::json;

    fn recorder() -> (Arc<Mutex<Vec<Payload>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = Subscription::new(move |p| {
            sink.lock().push(p.clone());
            Ok(())
        });
        (seen, sub)
    }

    #[test]
    fn test_offer_outcomes() {
        let ok = Subscription::new(|_| Ok(()));
        let rejecting = Subscription::new(|_| Ok(())).with_filter(|_| false);
        let failing = Subscription::new(|_| Err("boom".into()));

        assert_eq!(offer(&ok, &json!(1)), Outcome::Delivered);
        assert_eq!(offer(&rejecting, &json!(1)), Outcome::Filtered);
        assert_eq!(
            offer(&failing, &json!(1)),
            Outcome::Failed(DeliveryError::new("boom"))
        );
    }

    #[test]
    fn test_offer_catches_panics() {
        let panicking_callback = Subscription::new(|_| panic!("callback exploded"));
        let panicking_filter = Subscription::new(|_| Ok(())).with_filter(|_| panic!("bad filter"));

        match offer(&panicking_callback, &json!(1)) {
            Outcome::Failed(err) => assert!(err.reason().contains("callback exploded")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(matches!(
            offer(&panicking_filter, &json!(1)),
            Outcome::Failed(_)
        ));
    }

    #[tokio::test]
    async fn test_drain_isolates_failures() {
        let log = Arc::new(MemoryLog::new());
        let engine = DeliveryEngine::new(log.clone());
        let topic = Topic::new("news");

        let (seen, healthy) = recorder();
        topic.subscribe(Subscription::new(|_| Err("offline".into())));
        topic.subscribe(healthy);

        topic.enqueue(1, json!("x"));
        topic.enqueue(1, json!("y"));
        engine.drain(&topic).await;

        assert_eq!(*seen.lock(), vec![json!("x"), json!("y")]);
        assert_eq!(log.snapshot("news"), vec![json!("x"), json!("y")]);

        let stats = topic.stats();
        assert_eq!(stats.delivered_count, 2);
        assert_eq!(stats.failed_count, 2);
        assert!(topic.is_idle());
    }

    #[tokio::test]
    async fn test_filtered_payload_is_not_a_failure() {
        let log = Arc::new(MemoryLog::new());
        let engine = DeliveryEngine::new(log.clone());
        let topic = Topic::new("news");
        topic.subscribe(Subscription::new(|_| Err("never called".into())).with_filter(|_| false));

        topic.enqueue(1, json!("x"));
        engine.drain(&topic).await;

        assert_eq!(log.len("news"), 0);
        assert_eq!(topic.stats().failed_count, 0);
    }
}
