//! Error types for the cache layer
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache and its storage backends.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key absent from storage and no default supplied
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Logical key rejected before touching storage
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Persisted data is not a flat key-value mapping
    #[error("Invalid storage format: {0}")]
    InvalidFormat(String),

    /// Backend-reported failure
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CacheError {
    /// Returns true for the soft "absent" condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound(_))
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache layer.
pub type Result<T> = std::result::Result<T, CacheError>;
