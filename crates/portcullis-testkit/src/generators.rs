//! Proptest generators for property-based testing.

use std::time::Duration;

use proptest::prelude::*;

use portcullis_core::{Identity, Keypair, LogAddress, LogManifest};
use portcullis_perms::{Outcome, PermissionRequest};

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a random, well-formed identity.
pub fn identity() -> impl Strategy<Value = Identity> {
    keypair().prop_map(|kp| kp.identity())
}

/// Generate a log name.
pub fn log_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,23}"
}

/// Generate a data log manifest.
pub fn data_manifest() -> impl Strategy<Value = LogManifest> {
    (identity(), log_name()).prop_map(|(owner, name)| LogManifest::data(owner, name))
}

/// Generate a random LogAddress.
pub fn log_address() -> impl Strategy<Value = LogAddress> {
    any::<[u8; 32]>().prop_map(LogAddress::from_bytes)
}

/// Generate a reasonable timestamp.
pub fn timestamp() -> impl Strategy<Value = i64> {
    0i64..=i64::MAX / 2
}

/// Generate a non-zero TTL up to 30 days.
pub fn ttl() -> impl Strategy<Value = Duration> {
    (1u64..=30 * 24 * 3600 * 1000).prop_map(Duration::from_millis)
}

/// Generate a decision outcome.
pub fn outcome() -> impl Strategy<Value = Outcome> {
    prop_oneof![Just(Outcome::Granted), Just(Outcome::Denied)]
}

/// Generate a pending permission request.
pub fn permission_request() -> impl Strategy<Value = PermissionRequest> {
    (identity(), data_manifest(), ".{0,64}", timestamp(), ttl()).prop_map(
        |(requester, manifest, reason, at, ttl)| {
            PermissionRequest::new(requester, manifest.address(), manifest.owner, reason, at, ttl)
        },
    )
}

/// Generate a request that may carry a decision.
pub fn any_request() -> impl Strategy<Value = PermissionRequest> {
    (permission_request(), prop::option::of((outcome(), 0i64..1_000_000))).prop_map(
        |(request, decision)| match decision {
            Some((outcome, after)) => {
                let at = request.requested_at + after;
                request.decided(outcome, request.owner, at, None)
            }
            None => request,
        },
    )
}
