//! The grant registry.
//!
//! The only shared mutable state in a peer. The access gate reads it on
//! every append; the coordinator writes it when a request is granted or a
//! grant is revoked.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::sync::Notify;

use portcullis_core::{duration_millis, Clock, Identity, LogAddress};

use crate::grant::{Grant, GrantKey};

/// In-memory table of time-bounded write grants.
///
/// Each key maps to an `Arc<Grant>` that is replaced wholesale on every
/// write, so readers never observe a half-updated grant. Expired grants are
/// invisible to lookups immediately and are physically removed by
/// [`sweep`](Self::sweep) or lazily by [`list`](Self::list).
pub struct GrantRegistry {
    clock: Arc<dyn Clock>,
    grants: RwLock<HashMap<GrantKey, Arc<Grant>>>,
    sweep_signal: Notify,
}

impl GrantRegistry {
    /// Create an empty registry judging expiry by `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            grants: RwLock::new(HashMap::new()),
            sweep_signal: Notify::new(),
        }
    }

    /// Current time according to the registry's clock.
    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Install or overwrite the grant for `(log, grantee)`.
    ///
    /// The grant expires `ttl` from now. Re-granting replaces any previous
    /// expiry, even a later one.
    pub fn grant(&self, log: LogAddress, grantee: Identity, ttl: Duration) -> Grant {
        let granted_at = self.now();
        let grant = Grant {
            grantee,
            log,
            granted_at,
            expires_at: granted_at.saturating_add(duration_millis(ttl)),
        };

        self.write().insert(grant.key(), Arc::new(grant.clone()));
        tracing::info!(
            log = %log,
            grantee = %grantee,
            expires_at = grant.expires_at,
            "grant installed"
        );
        grant
    }

    /// Remove the grant for `(log, grantee)` immediately.
    pub fn revoke(&self, log: LogAddress, grantee: Identity) -> Option<Grant> {
        let removed = self.write().remove(&GrantKey::new(log, grantee));
        if removed.is_some() {
            tracing::info!(log = %log, grantee = %grantee, "grant revoked");
        }
        removed.map(|g| (*g).clone())
    }

    /// The live grant for `(log, grantee)`, if any.
    pub fn lookup(&self, log: &LogAddress, grantee: &Identity) -> Option<Arc<Grant>> {
        let now = self.now();
        self.read()
            .get(&GrantKey::new(*log, *grantee))
            .filter(|g| g.is_live(now))
            .cloned()
    }

    /// Whether `grantee` currently holds a live grant for `log`.
    pub fn is_authorized(&self, log: &LogAddress, grantee: &Identity) -> bool {
        self.lookup(log, grantee).is_some()
    }

    /// Live grants for `log`, ordered by grantee.
    ///
    /// Expired grants for `log` are purged as a side effect.
    pub fn list(&self, log: &LogAddress) -> Vec<Grant> {
        let now = self.now();
        let mut grants = self.write();
        grants.retain(|key, g| key.log != *log || g.is_live(now));

        let mut live: Vec<Grant> = grants
            .values()
            .filter(|g| g.log == *log)
            .map(|g| (**g).clone())
            .collect();
        live.sort_by_key(|g| g.grantee);
        live
    }

    /// Remove every expired grant. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.now();
        let mut grants = self.write();
        let before = grants.len();
        grants.retain(|_, g| g.is_live(now));
        let removed = before - grants.len();
        if removed > 0 {
            tracing::debug!(removed, "swept expired grants");
        }
        removed
    }

    /// Ask whoever drives sweeps to run one soon. Never blocks.
    ///
    /// Requests made while no sweep is pending coalesce into one.
    pub fn request_sweep(&self) {
        self.sweep_signal.notify_one();
    }

    /// Wait until a sweep has been requested.
    pub async fn sweep_requested(&self) {
        self.sweep_signal.notified().await;
    }

    /// Drop every grant. Used on teardown.
    pub fn clear(&self) {
        self.write().clear();
    }

    /// Number of stored grants, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether no grants are stored.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<GrantKey, Arc<Grant>>> {
        self.grants.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<GrantKey, Arc<Grant>>> {
        self.grants.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for GrantRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrantRegistry")
            .field("grants", &self.len())
            .finish()
    }
}
