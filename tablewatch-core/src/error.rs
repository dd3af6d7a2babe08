//! Error types for tablewatch-core

use thiserror::Error;

/// Error type for tablewatch operations
///
/// Only faults the caller must see are errors. Missing issues or an absent
/// dependency graph are normal runtime conditions and surface as `None` or
/// empty collections instead.
#[derive(Debug, Error)]
pub enum WatchError {
    /// Backing store could not be read or written
    #[error("Storage error: {0}")]
    Storage(String),

    /// Persisted payload has a version this build cannot upgrade
    #[error("Schema migration failed: {0}")]
    Migration(String),

    /// Serialization or deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration file is invalid
    #[error("Config error: {0}")]
    Config(String),

    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The monitor task is no longer running
    #[error("Monitor stopped")]
    MonitorStopped,
}

impl From<serde_json::Error> for WatchError {
    fn from(e: serde_json::Error) -> Self {
        WatchError::Serialization(e.to_string())
    }
}

/// Result type alias for tablewatch operations
pub type Result<T> = std::result::Result<T, WatchError>;
