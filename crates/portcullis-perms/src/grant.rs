//! Write grants.
//!
//! A grant lets one identity write to one protected log until it expires.
//! Grants live only in the owning peer's registry; they are never written
//! to any log or sent to other peers.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use portcullis_core::{Identity, LogAddress};

/// Registry key: at most one live grant per (log, grantee).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GrantKey {
    /// The protected log.
    pub log: LogAddress,
    /// The identity allowed to write.
    pub grantee: Identity,
}

impl GrantKey {
    /// Create a new key.
    pub fn new(log: LogAddress, grantee: Identity) -> Self {
        Self { log, grantee }
    }
}

/// A time-bounded authorization for one identity to write one log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    /// The identity allowed to write.
    pub grantee: Identity,

    /// The protected log.
    pub log: LogAddress,

    /// When the grant was installed (Unix milliseconds).
    pub granted_at: i64,

    /// First instant at which the grant no longer applies (Unix milliseconds).
    pub expires_at: i64,
}

impl Grant {
    /// The registry key of this grant.
    pub fn key(&self) -> GrantKey {
        GrantKey::new(self.log, self.grantee)
    }

    /// Whether the grant applies at `now`.
    pub fn is_live(&self, now: i64) -> bool {
        now < self.expires_at
    }

    /// Time left before expiry, zero if already expired.
    pub fn remaining(&self, now: i64) -> Duration {
        let millis = self.expires_at.saturating_sub(now).max(0);
        Duration::from_millis(millis as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(granted_at: i64, expires_at: i64) -> Grant {
        Grant {
            grantee: Identity::from_bytes([1; 32]),
            log: LogAddress::from_bytes([2; 32]),
            granted_at,
            expires_at,
        }
    }

    #[test]
    fn test_grant_liveness_boundary() {
        let g = grant(0, 1_000);
        assert!(g.is_live(0));
        assert!(g.is_live(999));
        assert!(!g.is_live(1_000));
        assert!(!g.is_live(1_001));
    }

    #[test]
    fn test_remaining() {
        let g = grant(0, 1_000);
        assert_eq!(g.remaining(250), Duration::from_millis(750));
        assert_eq!(g.remaining(5_000), Duration::ZERO);
    }
}
