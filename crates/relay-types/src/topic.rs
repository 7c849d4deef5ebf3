//! Topic metadata types for Relay

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Topic metadata
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TopicInfo {
    /// Topic name (unique)
    pub name: String,

    /// When the topic was created
    pub created_at: DateTime<Utc>,
}

impl TopicInfo {
    /// Create metadata for a topic created now
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}

/// Topic statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct TopicStats {
    /// Number of registered subscriptions
    pub subscriber_count: u64,

    /// Envelopes waiting to be delivered
    pub pending_count: u64,

    /// Publishes accepted since the topic was created
    pub published_count: u64,

    /// Successful callback invocations
    pub delivered_count: u64,

    /// Failed filter or callback invocations
    pub failed_count: u64,

    /// Whether a delivery drain is running
    pub draining: bool,

    /// Whether the undelivered log holds records for this topic
    pub has_undelivered: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_info_creation() {
        let before = Utc::now();
        let info = TopicInfo::new("news");
        assert_eq!(info.name, "news");
        assert!(info.created_at >= before);
    }
}
