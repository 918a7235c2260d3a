//! Identity verification.
//!
//! Entry signatures bind an entry to its author key. A verifier decides
//! whether that key is an acceptable principal at all.

use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use portcullis_core::Identity;

/// Decides whether an identity may be trusted as an author.
///
/// May suspend, for example to consult a remote directory. Any failure must
/// be reported as `false`: callers fail closed.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Whether `identity` is verified.
    async fn verify(&self, identity: &Identity) -> bool;
}

/// Accepts any identity that is a usable Ed25519 key.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyVerifier;

#[async_trait]
impl IdentityVerifier for KeyVerifier {
    async fn verify(&self, identity: &Identity) -> bool {
        identity.is_well_formed()
    }
}

/// Wraps another verifier and rejects a set of blocked identities.
pub struct DenyListVerifier<V> {
    inner: V,
    blocked: RwLock<HashSet<Identity>>,
}

impl<V: IdentityVerifier> DenyListVerifier<V> {
    /// Wrap `inner` with an empty deny list.
    pub fn new(inner: V) -> Self {
        Self {
            inner,
            blocked: RwLock::new(HashSet::new()),
        }
    }

    /// Block `identity`.
    pub fn block(&self, identity: Identity) {
        self.blocked
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identity);
    }

    /// Unblock `identity`.
    pub fn unblock(&self, identity: &Identity) {
        self.blocked
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(identity);
    }

    fn is_blocked(&self, identity: &Identity) -> bool {
        self.blocked
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(identity)
    }
}

#[async_trait]
impl<V: IdentityVerifier> IdentityVerifier for DenyListVerifier<V> {
    async fn verify(&self, identity: &Identity) -> bool {
        if self.is_blocked(identity) {
            return false;
        }
        self.inner.verify(identity).await
    }
}
