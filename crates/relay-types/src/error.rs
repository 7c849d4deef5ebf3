//! Error types for Relay
//!
//! Defines all error types used throughout the application.

use thiserror::Error;

/// Main error type for Relay operations
#[derive(Error, Debug)]
pub enum Error {
    /// Operation referenced a topic that was never created
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    /// The undelivered log could not be written, flushed or cleared
    #[error("Persistence failure on topic {topic}: {reason}")]
    Persistence { topic: String, reason: String },

    /// A stored undelivered record could not be decoded
    #[error("Unreadable undelivered record on topic {topic} (line {line}): {reason}")]
    ReplayParse {
        topic: String,
        line: usize,
        reason: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a persistence error from any displayable cause
    pub fn persistence(topic: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Persistence {
            topic: topic.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for Relay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by a subscriber while handling a payload.
///
/// Never reaches the publisher: the delivery engine records the payload in the
/// undelivered log and moves on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct DeliveryError {
    reason: String,
}

impl DeliveryError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl From<String> for DeliveryError {
    fn from(reason: String) -> Self {
        Self::new(reason)
    }
}

impl From<&str> for DeliveryError {
    fn from(reason: &str) -> Self {
        Self::new(reason)
    }
}
