//! Broker configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Directory holding the `undelivered_<topic>.json` logs
    #[serde(default = "default_undelivered_dir")]
    pub undelivered_dir: PathBuf,
}

fn default_undelivered_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            undelivered_dir: default_undelivered_dir(),
        }
    }
}

impl BrokerConfig {
    /// Use the given directory for undelivered logs
    pub fn with_undelivered_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.undelivered_dir = dir.into();
        self
    }
}
