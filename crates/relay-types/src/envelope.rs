//! Envelope types for Relay
//!
//! An envelope wraps a published payload with the metadata that decides its
//! place in a topic's pending queue.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Opaque structured payload carried by a message
pub type Payload = serde_json::Value;

/// Message priority (lower = more urgent)
pub type Priority = i64;

/// Priority used when none is given, and for every replayed message
pub const DEFAULT_PRIORITY: Priority = 1;

/// A published payload waiting in a topic's queue
///
/// Envelopes compare by `(priority, sequence)` only. The payload never takes
/// part in ordering, so any serializable value can be published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Message priority (lower = more urgent)
    pub priority: Priority,

    /// Per-topic sequence number assigned at enqueue time
    pub sequence: u64,

    /// Message body
    pub payload: Payload,
}

impl Envelope {
    /// Create a new envelope
    pub fn new(priority: Priority, sequence: u64, payload: Payload) -> Self {
        Self {
            priority,
            sequence,
            payload,
        }
    }

    /// The `(priority, sequence)` pair used for ordering
    pub fn sort_key(&self) -> (Priority, u64) {
        (self.priority, self.sequence)
    }
}

impl PartialEq for Envelope {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}

impl Eq for Envelope {}

impl PartialOrd for Envelope {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Envelope {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lower_priority_sorts_first() {
        let urgent = Envelope::new(1, 7, json!("urgent"));
        let relaxed = Envelope::new(2, 3, json!("relaxed"));
        assert!(urgent < relaxed);
    }

    #[test]
    fn test_sequence_breaks_ties() {
        let first = Envelope::new(1, 1, json!("zzz"));
        let second = Envelope::new(1, 2, json!("aaa"));
        assert!(first < second);
    }

    #[test]
    fn test_payload_ignored_by_ordering() {
        let a = Envelope::new(1, 1, json!({"k": 1}));
        let b = Envelope::new(1, 1, json!([1, 2, 3]));
        assert_eq!(a, b);
    }
}
