//! Relay Types - Core domain types for the pub/sub broker
//!
//! This crate contains all shared types used across Relay components.

pub mod config;
pub mod envelope;
pub mod error;
pub mod record;
pub mod subscription;
pub mod topic;

// Re-export commonly used types
pub use config::BrokerConfig;
pub use envelope::{Envelope, Payload, Priority, DEFAULT_PRIORITY};
pub use error::{DeliveryError, Error, Result};
pub use record::UndeliveredRecord;
pub use subscription::{Callback, Filter, Subscription, SubscriptionId};
pub use topic::{TopicInfo, TopicStats};
