//! Error types for the permissions module.

use thiserror::Error;

use portcullis_core::{Identity, LogAddress};

use crate::request::RequestId;
use crate::state::InvalidTransition;

/// Errors that can occur during permission operations.
#[derive(Debug, Error)]
pub enum PermsError {
    /// The caller may not perform this operation.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// No such request.
    #[error("request not found: {0}")]
    NotFound(RequestId),

    /// The request or grant has expired.
    #[error("request {0} has expired")]
    Expired(RequestId),

    /// The request already carries a terminal decision.
    #[error("request {0} has already been decided")]
    AlreadyDecided(RequestId),

    /// A live request for the same requester and log exists.
    ///
    /// Soft: `request` resolves it by returning the existing record.
    #[error("duplicate request from {requester} for log {log}")]
    DuplicateRequest {
        requester: Identity,
        log: LogAddress,
    },

    /// The log did not confirm a write in time.
    ///
    /// Soft: the local write stands.
    #[error("replication of {0} not confirmed in time")]
    ReplicationTimeout(RequestId),

    /// The requester failed identity verification, so it cannot be granted.
    #[error("identity verification failed: {0}")]
    VerificationFailure(Identity),

    /// State machine refused a transition.
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    /// Record serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The coordinator is not running.
    #[error("coordinator is not running")]
    NotRunning,

    /// Log error.
    #[error("log error: {0}")]
    Log(#[from] portcullis_log::LogError),

    /// Core error.
    #[error("core error: {0}")]
    Core(#[from] portcullis_core::CoreError),
}

/// Result type for permission operations.
pub type Result<T> = std::result::Result<T, PermsError>;
