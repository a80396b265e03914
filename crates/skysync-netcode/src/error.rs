//! Error types for skysync-netcode

use thiserror::Error;

/// Netcode error type
#[derive(Debug, Error)]
pub enum Error {
    /// Payload failed to encode or decode
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Transport is not connected
    #[error("transport disconnected")]
    Disconnected,

    /// Transport-specific send failure
    #[error("transport error: {0}")]
    Transport(String),
}

/// Result type for netcode operations
pub type Result<T> = std::result::Result<T, Error>;
