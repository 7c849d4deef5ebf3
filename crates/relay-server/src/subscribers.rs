//! Example subscribers attached by the server at startup

use relay_core::Broker;
use relay_types::{Payload, Result, Subscription};
use tracing::info;

/// Accept only text payloads mentioning "Python"
pub fn python_filter(payload: &Payload) -> bool {
    payload.as_str().is_some_and(|text| text.contains("Python"))
}

/// Subscriber that logs every payload it receives
pub fn logging(name: &str) -> Subscription {
    let label = name.to_string();
    Subscription::new(move |payload| {
        info!(subscriber = %label, payload = %payload, "Message received");
        Ok(())
    })
    .with_name(name)
}

/// Wire the example subscribers onto whichever of `news` and `sports` exist
pub fn attach_examples(broker: &Broker) -> Result<()> {
    if broker.get_topic("news").is_some() {
        broker.subscribe("news", logging("subscriber-one"))?;
        broker.subscribe(
            "news",
            logging("subscriber-two").with_filter(python_filter),
        )?;
    }

    if broker.get_topic("sports").is_some() {
        broker.subscribe("sports", logging("subscriber-two"))?;
    }

    for topic in broker.list_topics() {
        if topic.name != "news" && topic.name != "sports" {
            broker.subscribe(&topic.name, logging(&topic.name))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_storage::MemoryLog;
    use serde_json::json;

    #[test]
    fn test_python_filter() {
        assert!(python_filter(&json!("Breaking News: Python is awesome!")));
        assert!(!python_filter(&json!("General Update: AI is evolving!")));
        assert!(!python_filter(&json!({"lang": "Python"})));
    }

    #[tokio::test]
    async fn test_attach_examples() {
        let broker = Broker::new(MemoryLog::new());
        broker.create_topic("news");
        broker.create_topic("sports");
        broker.create_topic("weather");

        attach_examples(&broker).unwrap();

        let news = broker.topic_stats("news").await.unwrap();
        let sports = broker.topic_stats("sports").await.unwrap();
        let weather = broker.topic_stats("weather").await.unwrap();
        assert_eq!(news.subscriber_count, 2);
        assert_eq!(sports.subscriber_count, 1);
        assert_eq!(weather.subscriber_count, 1);
    }
}
