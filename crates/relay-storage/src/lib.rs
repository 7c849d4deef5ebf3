//! Relay Storage - Undelivered-message logs for the pub/sub broker
//!
//! This crate provides pluggable undelivered-log implementations.
//! Currently supports:
//! - JSON-lines files (default, durable across restarts)
//! - In-memory logs (for development/testing)

pub mod traits;

#[cfg(feature = "file")]
pub mod file;

#[cfg(feature = "memory")]
pub mod memory;

// Re-exports
pub use traits::{DrainedRecords, LogMark, UndeliveredLog};

#[cfg(feature = "file")]
pub use file::FileLog;

#[cfg(feature = "memory")]
pub use memory::MemoryLog;
