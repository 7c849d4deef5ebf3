//! Broker - topic registry and main entry point
//!
//! The Broker owns every topic and coordinates publishing, delivery and
//! replay of undelivered messages.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use relay_storage::{FileLog, UndeliveredLog};
use relay_types::{
    BrokerConfig, Error, Payload, Priority, Result, Subscription, SubscriptionId, TopicInfo,
    TopicStats, DEFAULT_PRIORITY,
};
use tracing::{debug, info};

use crate::delivery::DeliveryEngine;
use crate::topic::Topic;

/// Main pub/sub broker
pub struct Broker {
    /// Topics by name
    topics: DashMap<String, Arc<Topic>>,
    /// Undelivered-message log
    log: Arc<dyn UndeliveredLog>,
    /// Runs drain tasks
    engine: DeliveryEngine,
}

impl Broker {
    /// Create a new broker with the given undelivered log
    pub fn new(log: impl UndeliveredLog + 'static) -> Self {
        Self::with_log(Arc::new(log))
    }

    /// Create a new broker with an Arc log
    pub fn with_log(log: Arc<dyn UndeliveredLog>) -> Self {
        info!("Initializing Relay broker");
        Self {
            topics: DashMap::new(),
            engine: DeliveryEngine::new(log.clone()),
            log,
        }
    }

    /// Create a broker that keeps undelivered messages on disk
    pub async fn from_config(config: &BrokerConfig) -> Result<Self> {
        let log = FileLog::open(&config.undelivered_dir).await?;
        Ok(Self::new(log))
    }

    /// Get a reference to the undelivered log
    pub fn undelivered_log(&self) -> &dyn UndeliveredLog {
        self.log.as_ref()
    }

    // ==================== Topic Operations ====================

    /// Create a topic, or return the existing one
    pub fn create_topic(&self, name: impl Into<String>) -> TopicInfo {
        self.create_topic_with(name, std::iter::empty()).0
    }

    /// Create a topic that starts out with `subscriptions` registered
    ///
    /// The subscriptions are only attached when this call creates the topic;
    /// the flag tells whether it did. An existing topic is left untouched.
    pub fn create_topic_with(
        &self,
        name: impl Into<String>,
        subscriptions: impl IntoIterator<Item = Subscription>,
    ) -> (TopicInfo, bool) {
        let name = name.into();

        match self.topics.entry(name.clone()) {
            Entry::Occupied(entry) => {
                info!(topic = %name, "Topic already exists");
                (entry.get().info().clone(), false)
            }
            Entry::Vacant(entry) => {
                let topic = Topic::new(name.clone());
                let mut count = 0usize;
                for subscription in subscriptions {
                    topic.subscribe(subscription);
                    count += 1;
                }

                let topic_info = topic.info().clone();
                entry.insert(Arc::new(topic));
                info!(topic = %name, subscribers = count, "Topic created");
                (topic_info, true)
            }
        }
    }

    /// Get a topic by name
    pub fn get_topic(&self, name: &str) -> Option<TopicInfo> {
        self.topics.get(name).map(|t| t.info().clone())
    }

    /// List all topics, sorted by name
    pub fn list_topics(&self) -> Vec<TopicInfo> {
        let mut topics: Vec<TopicInfo> = self.topics.iter().map(|t| t.info().clone()).collect();
        topics.sort_by(|a, b| a.name.cmp(&b.name));
        topics
    }

    /// Get topic statistics
    pub async fn topic_stats(&self, name: &str) -> Result<TopicStats> {
        let topic = self.topic(name)?;
        let mut stats = topic.stats();
        stats.has_undelivered = self.log.has_pending(name).await?;
        Ok(stats)
    }

    /// Register a subscription on a topic
    pub fn subscribe(
        &self,
        topic_name: &str,
        subscription: Subscription,
    ) -> Result<SubscriptionId> {
        let topic = self.topic(topic_name)?;
        let label = subscription.label();
        let filtered = subscription.is_filtered();
        let id = topic.subscribe(subscription);

        info!(
            topic = %topic_name,
            subscription = %label,
            filtered = filtered,
            "Subscriber added"
        );
        Ok(id)
    }

    // ==================== Message Operations ====================

    /// Publish a payload to a topic
    ///
    /// Returns the sequence number assigned to the message. Delivery happens
    /// on a background task; this never waits for subscribers.
    pub async fn publish(
        &self,
        topic_name: &str,
        payload: impl Into<Payload>,
        priority: Priority,
    ) -> Result<u64> {
        let topic = self.topic(topic_name)?;
        Ok(self.enqueue(&topic, payload.into(), priority))
    }

    /// Publish a payload with the default priority
    pub async fn publish_default(
        &self,
        topic_name: &str,
        payload: impl Into<Payload>,
    ) -> Result<u64> {
        self.publish(topic_name, payload, DEFAULT_PRIORITY).await
    }

    /// Re-publish every undelivered message stored for a topic
    ///
    /// Replayed messages get the default priority and fresh sequence numbers.
    /// The log is cleared only after all of them are queued, and only of the
    /// records read here: messages failing again while the replay runs are
    /// kept for the next one. Returns the number of messages re-published.
    pub async fn replay(&self, topic_name: &str) -> Result<usize> {
        let topic = self.topic(topic_name)?;
        let _replaying = topic.replay_lock().lock().await;

        let drained = self.log.drain(topic_name).await?;
        if drained.is_empty() {
            if drained.mark.0 > 0 {
                // Only unreadable records were left; they were reported by the drain.
                self.log.clear(topic_name, drained.mark).await?;
            }
            info!(topic = %topic_name, "No undelivered messages found");
            return Ok(0);
        }

        let count = drained.len();
        info!(topic = %topic_name, count = count, "Replaying undelivered messages");

        for payload in drained.payloads {
            self.enqueue(&topic, payload, DEFAULT_PRIORITY);
        }

        self.log.clear(topic_name, drained.mark).await?;
        info!(topic = %topic_name, count = count, "Replay complete");

        Ok(count)
    }

    /// Wait until a topic has no pending messages and no running drain
    pub async fn wait_idle(&self, topic_name: &str) -> Result<()> {
        let topic = self.topic(topic_name)?;
        topic.wait_idle().await;
        Ok(())
    }

    fn enqueue(&self, topic: &Arc<Topic>, payload: Payload, priority: Priority) -> u64 {
        let enqueued = topic.enqueue(priority, payload);

        debug!(
            topic = %topic.name(),
            sequence = enqueued.sequence,
            priority = priority,
            "Message published"
        );

        if enqueued.start_drain {
            self.engine.spawn_drain(Arc::clone(topic));
        }

        enqueued.sequence
    }

    fn topic(&self, name: &str) -> Result<Arc<Topic>> {
        self.topics
            .get(name)
            .map(|t| Arc::clone(t.value()))
            .ok_or_else(|| Error::UnknownTopic(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use relay_storage::MemoryLog;
    use serde_json::json;

    fn create_test_broker() -> (Broker, Arc<MemoryLog>) {
        let log = Arc::new(MemoryLog::new());
        (Broker::with_log(log.clone()), log)
    }

    fn recorder() -> (Arc<Mutex<Vec<Payload>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = Subscription::new(move |p| {
            sink.lock().push(p.clone());
            Ok(())
        });
        (seen, sub)
    }

    #[tokio::test]
    async fn test_create_topic_idempotent() {
        let (broker, _) = create_test_broker();

        let first = broker.create_topic("news");
        let second = broker.create_topic("news");

        assert_eq!(first.created_at, second.created_at);
        assert_eq!(broker.list_topics().len(), 1);
    }

    #[tokio::test]
    async fn test_create_topic_with_subscribers_once() {
        let (broker, _) = create_test_broker();

        let (_, created) =
            broker.create_topic_with("news", [Subscription::new(|_| Ok(()))]);
        let (_, again) =
            broker.create_topic_with("news", [Subscription::new(|_| Ok(()))]);

        assert!(created);
        assert!(!again);
        assert_eq!(broker.topic_stats("news").await.unwrap().subscriber_count, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_create_topic_with_attaches_once() {
        let broker = Arc::new(create_test_broker().0);

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let broker = broker.clone();
            tasks.push(tokio::spawn(async move {
                broker
                    .create_topic_with("shared", [Subscription::new(|_| Ok(()))])
                    .1
            }));
        }

        let mut created = 0;
        for task in tasks {
            if task.await.unwrap() {
                created += 1;
            }
        }

        assert_eq!(created, 1);
        assert_eq!(broker.topic_stats("shared").await.unwrap().subscriber_count, 1);
    }

    #[tokio::test]
    async fn test_list_topics_sorted() {
        let (broker, _) = create_test_broker();
        broker.create_topic("sports");
        broker.create_topic("news");

        let names: Vec<String> = broker.list_topics().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["news", "sports"]);
        assert!(broker.get_topic("news").is_some());
        assert!(broker.get_topic("weather").is_none());
    }

    #[tokio::test]
    async fn test_unknown_topic() {
        let (broker, _) = create_test_broker();

        let err = broker
            .subscribe("ghost", Subscription::new(|_| Ok(())))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownTopic(name) if name == "ghost"));

        let err = broker.publish_default("ghost", "x").await.unwrap_err();
        assert!(matches!(err, Error::UnknownTopic(_)));

        assert!(matches!(
            broker.replay("ghost").await,
            Err(Error::UnknownTopic(_))
        ));
        assert!(matches!(
            broker.topic_stats("ghost").await,
            Err(Error::UnknownTopic(_))
        ));

        // no topic sneaks into the registry
        assert!(broker.list_topics().is_empty());
    }

    #[tokio::test]
    async fn test_publish_and_deliver() {
        let (broker, _) = create_test_broker();
        broker.create_topic("test");

        let (seen, sub) = recorder();
        broker.subscribe("test", sub).unwrap();

        let seq = broker.publish_default("test", "Hello, World!").await.unwrap();
        assert_eq!(seq, 0);

        broker.wait_idle("test").await.unwrap();
        assert_eq!(*seen.lock(), vec![json!("Hello, World!")]);
    }

    #[tokio::test]
    async fn test_filter_function() {
        let (broker, _) = create_test_broker();
        broker.create_topic("test");

        let (seen, sub) = recorder();
        broker.subscribe("test", sub.with_filter(|_| false)).unwrap();

        broker.publish_default("test", "Hello, World!").await.unwrap();
        broker.wait_idle("test").await.unwrap();

        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_undelivered_messages() {
        let (broker, log) = create_test_broker();
        broker.create_topic("test");
        broker
            .subscribe("test", Subscription::new(|_| Err("Delivery failed".into())))
            .unwrap();

        broker
            .publish_default("test", "Undeliverable Message")
            .await
            .unwrap();
        broker.wait_idle("test").await.unwrap();

        assert_eq!(log.snapshot("test"), vec![json!("Undeliverable Message")]);

        let stats = broker.topic_stats("test").await.unwrap();
        assert!(stats.has_undelivered);
        assert_eq!(stats.failed_count, 1);
    }

    #[tokio::test]
    async fn test_replay_undelivered_messages() {
        let (broker, log) = create_test_broker();
        broker.create_topic("test");
        log.append("test", &json!("Replayed Message")).await.unwrap();

        let (seen, sub) = recorder();
        broker.subscribe("test", sub).unwrap();

        let replayed = broker.replay("test").await.unwrap();
        broker.wait_idle("test").await.unwrap();

        assert_eq!(replayed, 1);
        assert_eq!(*seen.lock(), vec![json!("Replayed Message")]);
        assert!(!log.has_pending("test").await.unwrap());
    }

    #[tokio::test]
    async fn test_replay_without_records() {
        let (broker, _) = create_test_broker();
        broker.create_topic("test");

        assert_eq!(broker.replay("test").await.unwrap(), 0);
        assert_eq!(broker.topic_stats("test").await.unwrap().published_count, 0);
    }

    #[tokio::test]
    async fn test_replay_keeps_fresh_failures() {
        let (broker, log) = create_test_broker();
        broker.create_topic("test");
        broker
            .subscribe("test", Subscription::new(|_| Err("still down".into())))
            .unwrap();
        log.append("test", &json!("retry me")).await.unwrap();

        assert_eq!(broker.replay("test").await.unwrap(), 1);
        broker.wait_idle("test").await.unwrap();

        // the old record was cleared, the failed redelivery recorded anew
        assert_eq!(log.snapshot("test"), vec![json!("retry me")]);
    }
}
