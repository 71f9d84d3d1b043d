//! Core error types for `MagnetMax`.

use thiserror::Error;

/// Core error type for `MagnetMax` operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A call option carried an impossible value.
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with message.
    #[error("{0}")]
    Other(String),
}
