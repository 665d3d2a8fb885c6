//! Error types for the ZCM Web core library.

use thiserror::Error;

use crate::types::TypeHash;

/// Result type alias using the core Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Schema descriptor error
    #[error("Schema error: {0}")]
    Schema(String),

    /// Two registered types share a content hash
    #[error("Hash collision: {first} and {second} both hash to {hash}")]
    HashCollision {
        hash: TypeHash,
        first: String,
        second: String,
    },

    /// Two registered types share a full name
    #[error("Duplicate type name: {0}")]
    DuplicateType(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
