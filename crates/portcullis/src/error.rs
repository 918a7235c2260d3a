//! Error types for the Node.

use portcullis_core::LogAddress;
use portcullis_log::LogError;
use portcullis_perms::PermsError;
use thiserror::Error;

/// Errors that can occur during Node operations.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Permission error.
    #[error("permission error: {0}")]
    Permission(#[from] PermsError),

    /// Log error.
    #[error("log error: {0}")]
    Log(#[from] LogError),

    /// The manifest does not describe a protected data log.
    #[error("not a data log: {0}")]
    NotADataLog(LogAddress),

    /// The operation needs a log this node owns.
    #[error("not the owner of log {0}")]
    NotOwner(LogAddress),

    /// No such log is open on this node.
    #[error("log not open: {0}")]
    LogNotOpen(LogAddress),
}

/// Result type for Node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
