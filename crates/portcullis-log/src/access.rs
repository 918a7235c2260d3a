//! Basic access controllers for logs that are not permission-protected.

use async_trait::async_trait;
use portcullis_core::validate_entry_for;

use crate::traits::{AccessController, AccessDecision, AppendAttempt, DenyReason};

/// Accepts any well-formed, correctly signed entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAccess;

#[async_trait]
impl AccessController for OpenAccess {
    async fn decide(&self, attempt: &AppendAttempt<'_>) -> AccessDecision {
        match validate_entry_for(attempt.entry, &attempt.address()) {
            Ok(()) => AccessDecision::Allow,
            Err(e) => AccessDecision::Deny(DenyReason::Unverified(e.to_string())),
        }
    }
}

/// Accepts only entries signed by the log's owner.
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnerOnly;

#[async_trait]
impl AccessController for OwnerOnly {
    async fn decide(&self, attempt: &AppendAttempt<'_>) -> AccessDecision {
        if let Err(e) = validate_entry_for(attempt.entry, &attempt.address()) {
            return AccessDecision::Deny(DenyReason::Unverified(e.to_string()));
        }
        if attempt.author() == &attempt.manifest.owner {
            AccessDecision::Allow
        } else {
            AccessDecision::Deny(DenyReason::NotOwner)
        }
    }
}
