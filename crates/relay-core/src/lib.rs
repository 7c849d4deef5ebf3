//! Relay Core - Core broker engine for the pub/sub broker
//!
//! This crate contains the main broker implementation including:
//! - Broker: topic registry and entry point
//! - Topic: subscribers and priority-ordered pending messages
//! - DeliveryEngine: per-topic drains and failure recording

pub mod broker;
pub mod delivery;
pub mod topic;

// Re-exports
pub use broker::Broker;
pub use delivery::{DeliveryEngine, Outcome};
pub use topic::Topic;
