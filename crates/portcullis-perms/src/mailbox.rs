//! Permission-request mailboxes.
//!
//! Every identity owns one mailbox log. Anyone may append a pending request
//! addressed to the owner; only the owner may decide or remove records.
//! The rules are enforced by [`MailboxGate`] at every replica, so a requester
//! cannot self-grant even on its own copy of the mailbox.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use portcullis_core::{validate_entry_for, Clock, EntryId, Identity, LogAddress, LogKind, LogManifest};
use portcullis_log::{
    AccessController, AccessDecision, AppendAttempt, DenyReason, LogEvent, LogRuntime,
    ReplicatedLog,
};

use crate::error::Result;
use crate::request::{PermissionRequest, RequestId};
use crate::verifier::IdentityVerifier;

/// Access controller for mailbox logs.
///
/// Holds no per-peer state, so every replica reaches the same verdict for
/// the same entry, prior record and clock reading.
pub struct MailboxGate {
    verifier: Arc<dyn IdentityVerifier>,
    clock: Arc<dyn Clock>,
}

impl MailboxGate {
    /// Create a mailbox gate.
    pub fn new(verifier: Arc<dyn IdentityVerifier>, clock: Arc<dyn Clock>) -> Self {
        Self { verifier, clock }
    }

    fn check(&self, attempt: &AppendAttempt<'_>) -> AccessDecision {
        let owner = attempt.manifest.owner;
        let author = *attempt.author();
        let entry = attempt.entry;

        if attempt.manifest.kind != LogKind::Mailbox {
            return forbid("not a mailbox log");
        }

        if entry.is_delete() {
            return if author == owner {
                AccessDecision::Allow
            } else {
                AccessDecision::Deny(DenyReason::NotOwner)
            };
        }

        let record = match PermissionRequest::from_bytes(&entry.value) {
            Ok(record) => record,
            Err(_) => return forbid("malformed request record"),
        };
        if entry.key() != record.key() {
            return forbid("key does not match request id");
        }
        if record.owner != owner {
            return forbid("record addressed to another mailbox");
        }
        if record.expires_at < record.requested_at {
            return forbid("expiry precedes request time");
        }

        let prior = match attempt.prior.map(|e| PermissionRequest::from_bytes(&e.value)) {
            None => None,
            Some(Ok(prior)) => Some(prior),
            Some(Err(_)) => return forbid("malformed prior record"),
        };

        if record.is_pending() {
            if author != record.requester {
                return forbid("pending record not authored by requester");
            }
            if !record.id_matches() {
                return forbid("request id does not match record");
            }
            if record.decided_at.is_some() || record.decided_by.is_some() {
                return forbid("pending record carries a decision");
            }
            if record.is_expired(self.clock.now_millis()) {
                return forbid("request already expired");
            }
            if prior.as_ref().is_some_and(PermissionRequest::is_decided) {
                return forbid("request already decided");
            }
        } else {
            if author != owner {
                return AccessDecision::Deny(DenyReason::NotOwner);
            }
            if record.decided_by != Some(owner) || record.decided_at.is_none() {
                return forbid("decision not attributed to owner");
            }
            if let Some(prior) = &prior {
                if !prior.is_pending() || !prior.same_request(&record) {
                    return forbid("decision does not follow a matching pending record");
                }
            }
        }

        AccessDecision::Allow
    }
}

fn forbid(why: &str) -> AccessDecision {
    AccessDecision::Deny(DenyReason::Forbidden(why.to_string()))
}

#[async_trait]
impl AccessController for MailboxGate {
    async fn decide(&self, attempt: &AppendAttempt<'_>) -> AccessDecision {
        let address = attempt.address();
        let author = *attempt.author();

        if let Err(e) = validate_entry_for(attempt.entry, &address) {
            return AccessDecision::Deny(DenyReason::Unverified(e.to_string()));
        }
        if !self.verifier.verify(&author).await {
            return AccessDecision::Deny(DenyReason::Unverified(format!(
                "identity {author} not verified"
            )));
        }

        let decision = self.check(attempt);
        if let AccessDecision::Deny(reason) = &decision {
            tracing::debug!(mailbox = %address, author = %author, %reason, "mailbox write refused");
        }
        decision
    }
}

/// Typed view of one replica of an identity's mailbox.
pub struct RequestMailbox<L> {
    log: Arc<L>,
}

impl<L: ReplicatedLog> RequestMailbox<L> {
    /// Wrap an already-open mailbox replica.
    pub fn new(log: Arc<L>) -> Self {
        Self { log }
    }

    /// Open (or join) `owner`'s mailbox through `runtime`.
    pub async fn open<R>(
        runtime: &R,
        owner: Identity,
        verifier: Arc<dyn IdentityVerifier>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self>
    where
        R: LogRuntime<Log = L>,
    {
        let gate = Arc::new(MailboxGate::new(verifier, clock));
        let log = runtime.open(LogManifest::mailbox(owner), gate).await?;
        Ok(Self::new(log))
    }

    /// The identity the mailbox belongs to.
    pub fn owner(&self) -> Identity {
        self.log.manifest().owner
    }

    /// The mailbox's log address.
    pub fn address(&self) -> LogAddress {
        self.log.address()
    }

    /// The underlying log replica.
    pub fn log(&self) -> &Arc<L> {
        &self.log
    }

    /// Change notifications for this replica.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.log.subscribe()
    }

    /// Write `record` under its id.
    pub async fn put(&self, record: &PermissionRequest) -> Result<EntryId> {
        let id = self.log.set(&record.key(), record.to_bytes()?).await?;
        Ok(id)
    }

    /// The record stored under `id`.
    pub async fn get(&self, id: &RequestId) -> Result<Option<PermissionRequest>> {
        self.get_key(&id.to_hex()).await
    }

    /// The record stored under a raw mailbox key.
    pub async fn get_key(&self, key: &str) -> Result<Option<PermissionRequest>> {
        match self.log.get(key).await? {
            Some(bytes) => Ok(Some(PermissionRequest::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Tombstone the record stored under `id`.
    pub async fn remove(&self, id: &RequestId) -> Result<EntryId> {
        Ok(self.log.delete(&id.to_hex()).await?)
    }

    /// Every live record in this replica.
    ///
    /// Undecodable values are skipped; the gate never admits them, so they
    /// can only come from a foreign log engine.
    pub async fn records(&self) -> Result<Vec<PermissionRequest>> {
        let mut records = Vec::new();
        for (key, value) in self.log.all().await? {
            match PermissionRequest::from_bytes(&value) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(mailbox = %self.address(), key, error = %e, "skipping undecodable record");
                }
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Outcome;
    use crate::verifier::KeyVerifier;
    use portcullis_core::{Entry, EntryBuilder, Keypair, ManualClock};
    use portcullis_log::MemoryNetwork;
    use std::time::Duration;

    const TTL: Duration = Duration::from_secs(48 * 3600);

    struct Fixture {
        clock: Arc<ManualClock>,
        gate: MailboxGate,
        owner: Keypair,
        requester: Keypair,
        manifest: LogManifest,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let owner = Keypair::from_seed(&[1; 32]);
        Fixture {
            gate: MailboxGate::new(Arc::new(KeyVerifier), clock.clone()),
            clock,
            manifest: LogManifest::mailbox(owner.identity()),
            owner,
            requester: Keypair::from_seed(&[2; 32]),
        }
    }

    fn pending(fx: &Fixture) -> PermissionRequest {
        PermissionRequest::new(
            fx.requester.identity(),
            LogManifest::data(fx.owner.identity(), "notes").address(),
            fx.owner.identity(),
            "need access",
            fx.clock.now_millis(),
            TTL,
        )
    }

    fn put(fx: &Fixture, author: &Keypair, record: &PermissionRequest) -> Entry {
        EntryBuilder::new(author.identity(), fx.manifest.address(), record.key())
            .timestamp(fx.clock.now_millis())
            .value(record.to_bytes().unwrap())
            .sign(author)
    }

    async fn decide(fx: &Fixture, entry: &Entry, prior: Option<&Entry>) -> AccessDecision {
        fx.gate
            .decide(&AppendAttempt {
                manifest: &fx.manifest,
                entry,
                prior,
            })
            .await
    }

    #[tokio::test]
    async fn test_requester_may_append_pending() {
        let fx = fixture();
        let e = put(&fx, &fx.requester, &pending(&fx));
        assert!(decide(&fx, &e, None).await.is_allowed());
    }

    #[tokio::test]
    async fn test_cannot_append_on_behalf_of_another() {
        let fx = fixture();
        let mallory = Keypair::from_seed(&[3; 32]);
        let e = put(&fx, &mallory, &pending(&fx));
        assert!(!decide(&fx, &e, None).await.is_allowed());
    }

    #[tokio::test]
    async fn test_requester_cannot_self_grant() {
        let fx = fixture();
        let record = pending(&fx);
        let prior = put(&fx, &fx.requester, &record);
        let forged = record.decided(Outcome::Granted, fx.owner.identity(), fx.clock.now_millis(), None);
        let e = put(&fx, &fx.requester, &forged);
        assert_eq!(
            decide(&fx, &e, Some(&prior)).await,
            AccessDecision::Deny(DenyReason::NotOwner)
        );
    }

    #[tokio::test]
    async fn test_owner_decides_pending() {
        let fx = fixture();
        let record = pending(&fx);
        let prior = put(&fx, &fx.requester, &record);
        let granted = record.decided(Outcome::Granted, fx.owner.identity(), fx.clock.now_millis(), None);
        let e = put(&fx, &fx.owner, &granted);
        assert!(decide(&fx, &e, Some(&prior)).await.is_allowed());
    }

    #[tokio::test]
    async fn test_decision_cannot_be_overwritten() {
        let fx = fixture();
        let record = pending(&fx);
        let now = fx.clock.now_millis();
        let granted = record.decided(Outcome::Granted, fx.owner.identity(), now, None);
        let prior = put(&fx, &fx.owner, &granted);

        let denied = record.decided(Outcome::Denied, fx.owner.identity(), now, None);
        let e = put(&fx, &fx.owner, &denied);
        assert!(!decide(&fx, &e, Some(&prior)).await.is_allowed());

        let resubmit = put(&fx, &fx.requester, &record);
        assert!(!decide(&fx, &resubmit, Some(&prior)).await.is_allowed());
    }

    #[tokio::test]
    async fn test_decision_must_match_pending() {
        let fx = fixture();
        let record = pending(&fx);
        let prior = put(&fx, &fx.requester, &record);
        let mut altered = record.decided(Outcome::Granted, fx.owner.identity(), fx.clock.now_millis(), None);
        altered.expires_at += 1_000_000;
        let e = put(&fx, &fx.owner, &altered);
        assert!(!decide(&fx, &e, Some(&prior)).await.is_allowed());
    }

    #[tokio::test]
    async fn test_expired_pending_rejected() {
        let fx = fixture();
        let record = pending(&fx);
        fx.clock.advance(TTL);
        let e = put(&fx, &fx.requester, &record);
        assert!(!decide(&fx, &e, None).await.is_allowed());
    }

    #[tokio::test]
    async fn test_only_owner_removes() {
        let fx = fixture();
        let key = pending(&fx).key();
        let tombstone = |author: &Keypair| {
            EntryBuilder::new(author.identity(), fx.manifest.address(), key.clone())
                .delete()
                .sign(author)
        };
        assert!(decide(&fx, &tombstone(&fx.owner), None).await.is_allowed());
        assert_eq!(
            decide(&fx, &tombstone(&fx.requester), None).await,
            AccessDecision::Deny(DenyReason::NotOwner)
        );
    }

    #[tokio::test]
    async fn test_rejects_wrong_key_and_wrong_owner() {
        let fx = fixture();
        let record = pending(&fx);
        let e = EntryBuilder::new(fx.requester.identity(), fx.manifest.address(), "other")
            .value(record.to_bytes().unwrap())
            .sign(&fx.requester);
        assert!(!decide(&fx, &e, None).await.is_allowed());

        let mut misaddressed = pending(&fx);
        misaddressed.owner = fx.requester.identity();
        let e = put(&fx, &fx.requester, &misaddressed);
        assert!(!decide(&fx, &e, None).await.is_allowed());
    }

    #[tokio::test]
    async fn test_rejects_garbage() {
        let fx = fixture();
        let e = EntryBuilder::new(fx.requester.identity(), fx.manifest.address(), "k")
            .value(b"garbage".to_vec())
            .sign(&fx.requester);
        assert!(!decide(&fx, &e, None).await.is_allowed());
    }

    #[tokio::test]
    async fn test_data_log_is_not_a_mailbox() {
        let fx = fixture();
        let manifest = LogManifest::data(fx.owner.identity(), "notes");
        let e = EntryBuilder::new(fx.owner.identity(), manifest.address(), "k")
            .sign(&fx.owner);
        let decision = fx
            .gate
            .decide(&AppendAttempt {
                manifest: &manifest,
                entry: &e,
                prior: None,
            })
            .await;
        assert!(!decision.is_allowed());
    }

    #[tokio::test]
    async fn test_request_mailbox_replicates() {
        let network = MemoryNetwork::new();
        let clock = Arc::new(ManualClock::new(5_000));
        let owner = Keypair::from_seed(&[1; 32]);
        let requester = Keypair::from_seed(&[2; 32]);
        let owner_rt = network.runtime(owner.clone(), clock.clone());
        let requester_rt = network.runtime(requester.clone(), clock.clone());

        let own = RequestMailbox::open(&owner_rt, owner.identity(), Arc::new(KeyVerifier), clock.clone())
            .await
            .unwrap();
        let remote = RequestMailbox::open(&requester_rt, owner.identity(), Arc::new(KeyVerifier), clock.clone())
            .await
            .unwrap();
        assert_eq!(own.address(), remote.address());
        assert_eq!(remote.owner(), owner.identity());

        let record = PermissionRequest::new(
            requester.identity(),
            LogManifest::data(owner.identity(), "notes").address(),
            owner.identity(),
            "please",
            clock.now_millis(),
            TTL,
        );
        remote.put(&record).await.unwrap();
        assert_eq!(own.get(&record.id).await.unwrap(), Some(record.clone()));

        let granted = record.decided(Outcome::Granted, owner.identity(), clock.now_millis(), None);
        own.put(&granted).await.unwrap();
        assert_eq!(remote.get(&record.id).await.unwrap(), Some(granted));

        own.remove(&record.id).await.unwrap();
        assert!(remote.records().await.unwrap().is_empty());
        assert_eq!(own.get(&record.id).await.unwrap(), None);
    }
}
