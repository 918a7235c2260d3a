//! Error types for Portcullis Core.

use thiserror::Error;

use crate::address::LogAddress;

/// Core errors that can occur during entry operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid identity")]
    InvalidIdentity,

    #[error("value hash mismatch: expected {expected}, got {actual}")]
    ValueHashMismatch { expected: String, actual: String },

    #[error("unsupported entry version: {0}")]
    UnsupportedVersion(u8),

    #[error("malformed entry: {0}")]
    MalformedEntry(String),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Validation errors for entry structure and signatures.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("signature verification failed")]
    SignatureFailed,

    #[error("value hash does not match header")]
    ValueHashMismatch,

    #[error("unsupported version: {0}")]
    UnsupportedVersion(u8),

    #[error("entry targets log {got}, expected {expected}")]
    WrongLog {
        expected: LogAddress,
        got: LogAddress,
    },

    #[error("key is empty or longer than {max} bytes")]
    InvalidKey { max: usize },

    #[error("delete entries must carry an empty value")]
    DeleteWithValue,

    #[error("structural error: {0}")]
    StructuralError(String),
}

impl From<CoreError> for ValidationError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::InvalidSignature | CoreError::InvalidIdentity => {
                ValidationError::SignatureFailed
            }
            CoreError::ValueHashMismatch { .. } => ValidationError::ValueHashMismatch,
            CoreError::UnsupportedVersion(v) => ValidationError::UnsupportedVersion(v),
            CoreError::MalformedEntry(msg) => ValidationError::StructuralError(msg),
            CoreError::EncodingError(msg) | CoreError::DecodingError(msg) => {
                ValidationError::StructuralError(msg)
            }
        }
    }
}
