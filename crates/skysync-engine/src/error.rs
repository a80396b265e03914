//! Error types for skysync-engine

use thiserror::Error;

/// Engine error type
#[derive(Debug, Error)]
pub enum Error {
    /// Transport failure (send/receive)
    #[error("network error: {0}")]
    Net(#[from] skysync_netcode::Error),

    /// Persistence failure
    #[error("persistence error: {0}")]
    Store(#[from] skysync_store::Error),

    /// Core state error
    #[error("state error: {0}")]
    Core(#[from] skysync_core::Error),

    /// No animation settings configured for a key
    #[error("path {0:?} is not configured for animation")]
    NotAnimated(String),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;
