//! Permission request records.
//!
//! Records are authored by the requester but physically stored in the
//! target owner's mailbox, keyed by the hex form of their id.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use portcullis_core::{duration_millis, Identity, LogAddress};

use crate::error::{PermsError, Result};
use crate::state::RequestState;

/// A 32-byte request identifier.
///
/// Derived from Blake3(domain || requester || log || requested_at), so it is
/// unique per (requester, log, requested_at).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(pub [u8; 32]);

impl RequestId {
    /// Derive the id of a request.
    pub fn derive(requester: &Identity, log: &LogAddress, requested_at: i64) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"portcullis-request-v0:");
        hasher.update(requester.as_bytes());
        hasher.update(log.as_bytes());
        hasher.update(&requested_at.to_be_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    /// Convert to hex string. This is the record's mailbox key.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> std::result::Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

/// Recorded status of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestStatus {
    /// Awaiting a decision.
    Pending,
    /// Access granted.
    Granted,
    /// Access refused.
    Denied,
}

/// The owner's answer to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    /// Grant write access.
    Granted,
    /// Refuse write access.
    Denied,
}

impl From<Outcome> for RequestStatus {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Granted => RequestStatus::Granted,
            Outcome::Denied => RequestStatus::Denied,
        }
    }
}

/// A request for write access to one protected log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRequest {
    /// Unique id, see [`RequestId::derive`].
    pub id: RequestId,

    /// Who wants to write.
    pub requester: Identity,

    /// The protected log.
    pub log: LogAddress,

    /// Owner of the protected log and of the mailbox holding this record.
    pub owner: Identity,

    /// Free-form justification from the requester.
    pub reason: String,

    /// Recorded status.
    pub status: RequestStatus,

    /// When the requester created the record (Unix milliseconds).
    pub requested_at: i64,

    /// When the record stops mattering (Unix milliseconds).
    pub expires_at: i64,

    /// When the owner decided.
    pub decided_at: Option<i64>,

    /// Who decided. Always the owner.
    pub decided_by: Option<Identity>,

    /// Free-form justification from the owner.
    pub decision_reason: Option<String>,
}

impl PermissionRequest {
    /// Build a fresh pending request.
    pub fn new(
        requester: Identity,
        log: LogAddress,
        owner: Identity,
        reason: impl Into<String>,
        requested_at: i64,
        ttl: Duration,
    ) -> Self {
        Self {
            id: RequestId::derive(&requester, &log, requested_at),
            requester,
            log,
            owner,
            reason: reason.into(),
            status: RequestStatus::Pending,
            requested_at,
            expires_at: requested_at.saturating_add(duration_millis(ttl)),
            decided_at: None,
            decided_by: None,
            decision_reason: None,
        }
    }

    /// A copy of this record carrying the owner's decision.
    pub fn decided(
        &self,
        outcome: Outcome,
        decided_by: Identity,
        decided_at: i64,
        reason: Option<String>,
    ) -> Self {
        Self {
            status: outcome.into(),
            decided_at: Some(decided_at),
            decided_by: Some(decided_by),
            decision_reason: reason,
            ..self.clone()
        }
    }

    /// Whether the record still awaits a decision.
    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }

    /// Whether the record carries a decision.
    pub fn is_decided(&self) -> bool {
        !self.is_pending()
    }

    /// Whether `now` is at or past `expires_at`.
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    /// Time left before expiry, zero if already expired.
    pub fn remaining(&self, now: i64) -> Duration {
        let millis = self.expires_at.saturating_sub(now).max(0);
        Duration::from_millis(millis as u64)
    }

    /// Lifecycle state at `now`, with expiry overlaid.
    pub fn state(&self, now: i64) -> RequestState {
        if self.is_expired(now) {
            return RequestState::Expired;
        }
        match self.status {
            RequestStatus::Pending => RequestState::Pending,
            RequestStatus::Granted => RequestState::Granted,
            RequestStatus::Denied => RequestState::Denied,
        }
    }

    /// Whether `other` describes the same request, ignoring decision fields.
    pub fn same_request(&self, other: &PermissionRequest) -> bool {
        self.id == other.id
            && self.requester == other.requester
            && self.log == other.log
            && self.owner == other.owner
            && self.reason == other.reason
            && self.requested_at == other.requested_at
            && self.expires_at == other.expires_at
    }

    /// Whether the record's id matches its own fields.
    pub fn id_matches(&self) -> bool {
        self.id == RequestId::derive(&self.requester, &self.log, self.requested_at)
    }

    /// The mailbox key of this record.
    pub fn key(&self) -> String {
        self.id.to_hex()
    }

    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| PermsError::Serialization(e.to_string()))?;
        Ok(Bytes::from(buf))
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| PermsError::Serialization(e.to_string()))
    }
}
