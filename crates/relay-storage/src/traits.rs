//! Undelivered log trait definition
//!
//! Defines the interface that all undelivered-log backends must implement.

use async_trait::async_trait;
use relay_types::{Payload, Result};

/// Position in a topic's log observed by a [`UndeliveredLog::drain`] call.
///
/// The value is backend-defined (a byte offset for files, a record count in
/// memory) and only meaningful when handed back to the same backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogMark(pub u64);

/// Records read by a drain, plus the mark needed to clear exactly them
#[derive(Debug, Clone, Default)]
pub struct DrainedRecords {
    /// Decoded payloads, in storage order
    pub payloads: Vec<Payload>,

    /// Everything up to this mark is removed by [`UndeliveredLog::clear`]
    pub mark: LogMark,
}

impl DrainedRecords {
    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }
}

/// Undelivered log trait - all backends implement this
///
/// Records are topic-scoped. Appends are durable once `append` returns.
#[async_trait]
pub trait UndeliveredLog: Send + Sync {
    /// Record a payload that a subscriber failed to process
    async fn append(&self, topic: &str, payload: &Payload) -> Result<()>;

    /// Read every record present for a topic without removing it
    async fn drain(&self, topic: &str) -> Result<DrainedRecords>;

    /// Remove the records covered by `mark`; later appends survive
    async fn clear(&self, topic: &str, mark: LogMark) -> Result<()>;

    /// Whether `drain` would return at least one record for the topic
    async fn has_pending(&self, topic: &str) -> Result<bool>;
}
