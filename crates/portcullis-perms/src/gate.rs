//! The access gate.
//!
//! Installed as the access controller of every protected data log. Consulted
//! by the log runtime before any entry is applied to a replica.

use std::sync::Arc;

use async_trait::async_trait;

use portcullis_core::{validate_entry_for, Clock};
use portcullis_log::{AccessController, AccessDecision, AppendAttempt, DenyReason};

use crate::registry::GrantRegistry;
use crate::verifier::IdentityVerifier;

/// Write gate for a protected log.
///
/// Allows the log's owner unconditionally and anyone else only while they
/// hold a live grant in the local registry. Fails closed on anything it
/// cannot verify.
pub struct AccessGate {
    registry: Arc<GrantRegistry>,
    verifier: Arc<dyn IdentityVerifier>,
    clock: Arc<dyn Clock>,
}

impl AccessGate {
    /// Create a gate backed by `registry`.
    pub fn new(
        registry: Arc<GrantRegistry>,
        verifier: Arc<dyn IdentityVerifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            verifier,
            clock,
        }
    }
}

#[async_trait]
impl AccessController for AccessGate {
    async fn decide(&self, attempt: &AppendAttempt<'_>) -> AccessDecision {
        let address = attempt.address();
        let author = *attempt.author();

        // (a) resolve and verify the author
        if let Err(e) = validate_entry_for(attempt.entry, &address) {
            tracing::debug!(log = %address, author = %author, error = %e, "entry failed validation");
            return AccessDecision::Deny(DenyReason::Unverified(e.to_string()));
        }
        if !self.verifier.verify(&author).await {
            tracing::debug!(log = %address, author = %author, "author not verified");
            return AccessDecision::Deny(DenyReason::Unverified(format!(
                "identity {author} not verified"
            )));
        }

        // (b) the owner always writes
        if author == attempt.manifest.owner {
            return AccessDecision::Allow;
        }

        // (c) anyone else needs a live grant
        let now = self.clock.now_millis();
        match self.registry.lookup(&address, &author) {
            Some(grant) if grant.is_live(now) => {
                tracing::trace!(log = %address, author = %author, "write allowed by grant");
                AccessDecision::Allow
            }
            _ => {
                // (d) denied writers are a hint that stale grants may be lying around
                self.registry.request_sweep();
                tracing::debug!(log = %address, author = %author, "write denied: no live grant");
                AccessDecision::Deny(DenyReason::NoGrant)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verifier::{DenyListVerifier, KeyVerifier};
    use portcullis_core::{Entry, EntryBuilder, Keypair, LogManifest, ManualClock};
    use proptest::prelude::*;
    use std::time::Duration;

    struct Fixture {
        clock: Arc<ManualClock>,
        registry: Arc<GrantRegistry>,
        gate: AccessGate,
        owner: Keypair,
        manifest: LogManifest,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let registry = Arc::new(GrantRegistry::new(clock.clone()));
        let gate = AccessGate::new(registry.clone(), Arc::new(KeyVerifier), clock.clone());
        let owner = Keypair::from_seed(&[1; 32]);
        let manifest = LogManifest::data(owner.identity(), "protected");
        Fixture {
            clock,
            registry,
            gate,
            owner,
            manifest,
        }
    }

    fn entry(fx: &Fixture, author: &Keypair) -> Entry {
        EntryBuilder::new(author.identity(), fx.manifest.address(), "k")
            .timestamp(fx.clock.now_millis())
            .value(b"v".to_vec())
            .sign(author)
    }

    async fn decide(fx: &Fixture, entry: &Entry) -> AccessDecision {
        fx.gate
            .decide(&AppendAttempt {
                manifest: &fx.manifest,
                entry,
                prior: None,
            })
            .await
    }

    #[tokio::test]
    async fn test_owner_always_allowed() {
        let fx = fixture();
        let e = entry(&fx, &fx.owner);
        assert!(decide(&fx, &e).await.is_allowed());
    }

    #[tokio::test]
    async fn test_stranger_denied_without_grant() {
        let fx = fixture();
        let stranger = Keypair::from_seed(&[2; 32]);
        let e = entry(&fx, &stranger);
        assert_eq!(
            decide(&fx, &e).await,
            AccessDecision::Deny(DenyReason::NoGrant)
        );
    }

    #[tokio::test]
    async fn test_grant_expire_and_revoke() {
        let fx = fixture();
        let writer = Keypair::from_seed(&[2; 32]);
        let ttl = Duration::from_secs(60);

        fx.registry.grant(fx.manifest.address(), writer.identity(), ttl);
        assert!(decide(&fx, &entry(&fx, &writer)).await.is_allowed());

        fx.registry.revoke(fx.manifest.address(), writer.identity());
        assert!(!decide(&fx, &entry(&fx, &writer)).await.is_allowed());

        fx.registry.grant(fx.manifest.address(), writer.identity(), ttl);
        fx.clock.advance(ttl);
        assert!(!decide(&fx, &entry(&fx, &writer)).await.is_allowed());
    }

    #[tokio::test]
    async fn test_forged_owner_entry_is_unverified() {
        let fx = fixture();
        let forger = Keypair::from_seed(&[3; 32]);
        let mut e = entry(&fx, &forger);
        e.header.author = fx.owner.identity();
        assert!(matches!(
            decide(&fx, &e).await,
            AccessDecision::Deny(DenyReason::Unverified(_))
        ));
    }

    #[tokio::test]
    async fn test_unverified_identity_denied_despite_grant() {
        let fx = fixture();
        let writer = Keypair::from_seed(&[2; 32]);
        let verifier = Arc::new(DenyListVerifier::new(KeyVerifier));
        verifier.block(writer.identity());
        let gate = AccessGate::new(fx.registry.clone(), verifier, fx.clock.clone());

        fx.registry
            .grant(fx.manifest.address(), writer.identity(), Duration::from_secs(60));
        let e = entry(&fx, &writer);
        let decision = gate
            .decide(&AppendAttempt {
                manifest: &fx.manifest,
                entry: &e,
                prior: None,
            })
            .await;
        assert!(matches!(
            decision,
            AccessDecision::Deny(DenyReason::Unverified(_))
        ));
    }

    #[tokio::test]
    async fn test_denial_requests_sweep() {
        let fx = fixture();
        let stranger = Keypair::from_seed(&[2; 32]);
        decide(&fx, &entry(&fx, &stranger)).await;
        tokio::time::timeout(Duration::from_secs(1), fx.registry.sweep_requested())
            .await
            .expect("denial should request a sweep");
    }

    proptest! {
        #[test]
        fn prop_owner_allowed_regardless_of_registry(
            seed in any::<[u8; 32]>(),
            grants in prop::collection::vec((any::<[u8; 32]>(), 0u64..10_000), 0..8),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            let clock = Arc::new(ManualClock::new(0));
            let registry = Arc::new(GrantRegistry::new(clock.clone()));
            let gate = AccessGate::new(registry.clone(), Arc::new(KeyVerifier), clock.clone());
            let owner = Keypair::from_seed(&seed);
            let manifest = LogManifest::data(owner.identity(), "p");
            for (grantee, ttl) in grants {
                registry.grant(manifest.address(), Keypair::from_seed(&grantee).identity(), Duration::from_millis(ttl));
            }
            let e = EntryBuilder::new(owner.identity(), manifest.address(), "k").sign(&owner);
            let decision = rt.block_on(gate.decide(&AppendAttempt { manifest: &manifest, entry: &e, prior: None }));
            prop_assert!(decision.is_allowed());
        }
    }
}
