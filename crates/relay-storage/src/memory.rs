//! In-memory undelivered log
//!
//! Fast, non-persistent log for development and testing.
//! All records are lost when the process exits.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_types::{Payload, Result};
use tracing::{debug, info};

use crate::traits::{DrainedRecords, LogMark, UndeliveredLog};

/// In-memory undelivered log implementation
pub struct MemoryLog {
    /// Records stored by topic name, in append order
    records: Mutex<HashMap<String, Vec<Payload>>>,
}

impl MemoryLog {
    /// Create a new in-memory log
    pub fn new() -> Self {
        info!("Initializing in-memory undelivered log");
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Number of records stored for a topic
    pub fn len(&self, topic: &str) -> usize {
        self.records.lock().get(topic).map_or(0, Vec::len)
    }

    /// Copy of the records stored for a topic
    pub fn snapshot(&self, topic: &str) -> Vec<Payload> {
        self.records.lock().get(topic).cloned().unwrap_or_default()
    }
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UndeliveredLog for MemoryLog {
    async fn append(&self, topic: &str, payload: &Payload) -> Result<()> {
        self.records
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(payload.clone());

        debug!(topic = %topic, "Undelivered message saved");
        Ok(())
    }

    async fn drain(&self, topic: &str) -> Result<DrainedRecords> {
        let payloads = self.snapshot(topic);
        let mark = LogMark(payloads.len() as u64);
        Ok(DrainedRecords { payloads, mark })
    }

    async fn clear(&self, topic: &str, mark: LogMark) -> Result<()> {
        let mut records = self.records.lock();

        if let Some(stored) = records.get_mut(topic) {
            let cut = (mark.0 as usize).min(stored.len());
            stored.drain(..cut);
            if stored.is_empty() {
                records.remove(topic);
            }
        }

        Ok(())
    }

    async fn has_pending(&self, topic: &str) -> Result<bool> {
        Ok(self.len(topic) > 0)
    }
}
