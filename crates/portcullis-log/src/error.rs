//! Error types for the log module.

use portcullis_core::LogAddress;
use thiserror::Error;

/// Errors that can occur during log operations.
#[derive(Debug, Error)]
pub enum LogError {
    /// The log handle has been closed.
    #[error("log {0} is closed")]
    Closed(LogAddress),

    /// An entry was routed to a replica of a different log.
    #[error("address mismatch: expected {expected}, got {got}")]
    AddressMismatch {
        expected: LogAddress,
        got: LogAddress,
    },
}

/// Result type for log operations.
pub type Result<T> = std::result::Result<T, LogError>;
