//! Error types for exws-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid time unit: {0}")]
    InvalidTimeUnit(String),

    #[error("Invalid signing key: {0}")]
    InvalidKey(String),

    #[error("Unsupported signing key: {0}")]
    UnsupportedKey(String),
}

/// Result type alias for core operations.
pub type CoreResult<T> = std::result::Result<T, CoreError>;
