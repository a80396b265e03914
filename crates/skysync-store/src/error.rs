//! Error types for skysync-store

use thiserror::Error;

/// Persistence error type
#[derive(Debug, Error)]
pub enum Error {
    /// Filesystem read/write failure
    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted snapshot failed to parse
    #[error("snapshot parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result type for persistence operations
pub type Result<T> = std::result::Result<T, Error>;
