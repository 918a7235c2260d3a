//! Log traits: the abstract interface to the replicated log engine.
//!
//! The permission layer only ever talks to the log through these traits, so
//! any engine that can run an [`AccessController`] before applying an entry
//! can be protected.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;

use portcullis_core::{Entry, EntryId, EntryOp, Identity, LogAddress, LogManifest};

use crate::error::Result;

/// A change notification from a log replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    /// An entry was accepted into this replica.
    Update {
        /// The key written.
        key: String,
        /// The accepted entry.
        entry_id: EntryId,
        /// Who wrote it.
        author: Identity,
        /// Put or delete.
        op: EntryOp,
    },
    /// Another replica of this log appeared on the network.
    Join {
        /// The identity of the peer holding the new replica.
        peer: Identity,
    },
    /// The replica hit a non-fatal problem.
    Error {
        /// Human-readable description.
        message: String,
    },
}

/// A handle to one local replica of a replicated keyed log.
#[async_trait]
pub trait ReplicatedLog: Send + Sync {
    /// The stable, content-derived address of the log.
    fn address(&self) -> LogAddress;

    /// The creation-time manifest of the log.
    fn manifest(&self) -> &LogManifest;

    /// The local write identity used to sign entries.
    fn identity(&self) -> Identity;

    /// Write `value` under `key`.
    ///
    /// Returns the id of the signed entry. The entry is offered to every
    /// replica; whether any replica (including this one) accepts it is up to
    /// that replica's access controller.
    async fn set(&self, key: &str, value: Bytes) -> Result<EntryId>;

    /// Remove `key`. Subject to the same access control as `set`.
    async fn delete(&self, key: &str) -> Result<EntryId>;

    /// Current value of `key` at this replica.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Current entry for `key` at this replica, if the key is live.
    async fn entry(&self, key: &str) -> Result<Option<Entry>>;

    /// All live key/value pairs at this replica, ordered by key.
    async fn all(&self) -> Result<Vec<(String, Bytes)>>;

    /// Subscribe to change notifications.
    fn subscribe(&self) -> broadcast::Receiver<LogEvent>;

    /// Stop replicating. Further writes fail with `Closed`.
    async fn close(&self) -> Result<()>;
}

/// Opens log replicas on behalf of one local identity.
#[async_trait]
pub trait LogRuntime: Send + Sync + 'static {
    /// The replica handle type.
    type Log: ReplicatedLog + 'static;

    /// The identity this runtime writes as.
    fn identity(&self) -> Identity;

    /// Open (or return the already-open) replica of `manifest`'s log.
    ///
    /// `controller` governs which entries this replica accepts. It is fixed
    /// for the lifetime of the replica.
    async fn open(
        &self,
        manifest: LogManifest,
        controller: Arc<dyn AccessController>,
    ) -> Result<Arc<Self::Log>>;
}

/// An entry a replica is about to apply.
#[derive(Debug, Clone, Copy)]
pub struct AppendAttempt<'a> {
    /// The manifest of the target log.
    pub manifest: &'a LogManifest,
    /// The candidate entry.
    pub entry: &'a Entry,
    /// The replica's current live entry for the same key, if any.
    pub prior: Option<&'a Entry>,
}

impl AppendAttempt<'_> {
    /// The address of the target log.
    pub fn address(&self) -> LogAddress {
        self.manifest.address()
    }

    /// The claimed author of the candidate entry.
    pub fn author(&self) -> &Identity {
        self.entry.author()
    }
}

/// Why an append was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// Entry failed validation or the author could not be verified.
    Unverified(String),
    /// Only the owner may perform this write.
    NotOwner,
    /// No live grant covers the author.
    NoGrant,
    /// The entry violates a log-specific rule.
    Forbidden(String),
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::Unverified(why) => write!(f, "unverified: {why}"),
            DenyReason::NotOwner => f.write_str("not owner"),
            DenyReason::NoGrant => f.write_str("no live grant"),
            DenyReason::Forbidden(why) => write!(f, "forbidden: {why}"),
        }
    }
}

/// The outcome of an access check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    /// Apply the entry.
    Allow,
    /// Drop the entry.
    Deny(DenyReason),
}

impl AccessDecision {
    /// Check if the entry may be applied.
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allow)
    }
}

/// The policy a replica consults before applying any entry.
///
/// Implementations may suspend (for example to verify an identity), but are
/// on the append hot path and should be cheap in the common case.
#[async_trait]
pub trait AccessController: Send + Sync {
    /// Decide whether `attempt` may be applied.
    async fn decide(&self, attempt: &AppendAttempt<'_>) -> AccessDecision;
}
