//! Error types for claim handling
//!
//! Claims arrive from the authentication subsystem already verified; the only
//! failures here are shape problems found while decoding them.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type
#[derive(Debug, Error)]
pub enum CoreError {
    /// Claims payload could not be decoded
    #[error("Invalid claims: {0}")]
    InvalidClaims(String),

    /// Serialization/Deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// Create an invalid claims error
    pub fn invalid_claims<S: Into<String>>(msg: S) -> Self {
        CoreError::InvalidClaims(msg.into())
    }
}
