//! Error types for the Ratewall service.

use thiserror::Error;

use crate::ratelimit::StoreError;

/// Main error type for Ratewall operations.
#[derive(Error, Debug)]
pub enum RatewallError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Limiter storage errors
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Ratewall operations.
pub type Result<T> = std::result::Result<T, RatewallError>;
