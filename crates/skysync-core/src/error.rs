//! Error types for skysync-core

use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Catalog extension failed to parse
    #[error("catalog parse error: {0}")]
    CatalogParse(#[from] ron::error::SpannedError),

    /// A path was empty or otherwise unusable
    #[error("invalid path: {0:?}")]
    InvalidPath(String),
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;
