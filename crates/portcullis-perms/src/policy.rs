//! Automated decision policies.
//!
//! The coordinator consults its policy once for each new incoming pending
//! request. Returning `None` leaves the request for a manual decision.

use std::collections::HashSet;

use async_trait::async_trait;

use portcullis_core::{Identity, LogAddress};

use crate::request::{Outcome, PermissionRequest};

/// An automated decision with an optional reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDecision {
    /// Grant or deny.
    pub outcome: Outcome,
    /// Recorded as the decision reason.
    pub reason: Option<String>,
}

/// Decides incoming requests without user involvement.
#[async_trait]
pub trait DecisionPolicy: Send + Sync {
    /// Decide `request`, or return `None` to leave it pending.
    async fn evaluate(&self, request: &PermissionRequest) -> Option<PolicyDecision>;
}

/// Leaves every request for a manual decision.
#[derive(Debug, Clone, Copy, Default)]
pub struct Manual;

#[async_trait]
impl DecisionPolicy for Manual {
    async fn evaluate(&self, _request: &PermissionRequest) -> Option<PolicyDecision> {
        None
    }
}

/// Grants requests from an allowlist of identities.
///
/// Requests from anyone else are left pending. Optionally restricted to a
/// set of logs.
#[derive(Debug, Clone, Default)]
pub struct AutoGrant {
    requesters: HashSet<Identity>,
    logs: Option<HashSet<LogAddress>>,
}

impl AutoGrant {
    /// Grant any log to the given requesters.
    pub fn new(requesters: impl IntoIterator<Item = Identity>) -> Self {
        Self {
            requesters: requesters.into_iter().collect(),
            logs: None,
        }
    }

    /// Only grant access to these logs.
    pub fn for_logs(mut self, logs: impl IntoIterator<Item = LogAddress>) -> Self {
        self.logs = Some(logs.into_iter().collect());
        self
    }
}

#[async_trait]
impl DecisionPolicy for AutoGrant {
    async fn evaluate(&self, request: &PermissionRequest) -> Option<PolicyDecision> {
        if !self.requesters.contains(&request.requester) {
            return None;
        }
        if let Some(logs) = &self.logs {
            if !logs.contains(&request.log) {
                return None;
            }
        }
        Some(PolicyDecision {
            outcome: Outcome::Granted,
            reason: Some("auto-granted".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request(requester: u8, log: u8) -> PermissionRequest {
        PermissionRequest::new(
            Identity::from_bytes([requester; 32]),
            LogAddress::from_bytes([log; 32]),
            Identity::from_bytes([9; 32]),
            "",
            0,
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn test_manual_never_decides() {
        assert_eq!(Manual.evaluate(&request(1, 1)).await, None);
    }

    #[tokio::test]
    async fn test_auto_grant_allowlist() {
        let policy = AutoGrant::new([Identity::from_bytes([1; 32])]);
        assert_eq!(
            policy.evaluate(&request(1, 7)).await.map(|d| d.outcome),
            Some(Outcome::Granted)
        );
        assert_eq!(policy.evaluate(&request(2, 7)).await, None);
    }

    #[tokio::test]
    async fn test_auto_grant_log_filter() {
        let policy = AutoGrant::new([Identity::from_bytes([1; 32])])
            .for_logs([LogAddress::from_bytes([7; 32])]);
        assert!(policy.evaluate(&request(1, 7)).await.is_some());
        assert!(policy.evaluate(&request(1, 8)).await.is_none());
    }
}
