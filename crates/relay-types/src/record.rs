//! On-disk representation of an undelivered message

use serde::{Deserialize, Serialize};

use crate::envelope::Payload;

/// One line of an undelivered log: `{"message": <payload>}`
///
/// Priority and sequence are not stored; replayed payloads are re-published
/// with the default priority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UndeliveredRecord {
    pub message: Payload,
}

impl UndeliveredRecord {
    pub fn new(message: Payload) -> Self {
        Self { message }
    }

    /// Encode as a single JSON line (without the trailing newline)
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a single JSON line
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}
