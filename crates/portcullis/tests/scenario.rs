//! End-to-end permission scenarios over an in-process network.
//!
//! Every peer runs its own gate, registry and coordinator. Writes reach all
//! replicas synchronously, decisions reach requesters through their
//! dispatcher, and time only moves when a test advances the shared clock.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;

use portcullis::perms::{AutoGrant, DenyListVerifier, KeyVerifier, PermsError};
use portcullis::{
    CoordinatorEvent, Node, NodeConfig, NodeError, Outcome, ReplicatedLog, RequestStatus,
};
use portcullis_testkit::{init_tracing, wait_for_event, TestNetwork};

const HOUR: Duration = Duration::from_secs(3600);

fn value(s: &'static str) -> Bytes {
    Bytes::from_static(s.as_bytes())
}

fn is_granted(event: &CoordinatorEvent) -> bool {
    matches!(event, CoordinatorEvent::RequestGranted(_))
}

#[tokio::test]
async fn grant_opens_log_until_expiry() -> anyhow::Result<()> {
    init_tracing();
    let net = TestNetwork::new();
    let owner = net.peer(1).await;
    let requester = net.peer(2).await;

    let owned = owner.node.create_log("shared").await?;
    let replica = requester.node.open_log(owned.manifest().clone()).await?;
    let mut events = requester.node.subscribe();

    // Before any grant the write never materializes.
    replica.set("k", value("v")).await?;
    assert_eq!(owned.get("k").await?, None);
    assert_eq!(replica.get("k").await?, None);

    let request = requester
        .node
        .request(owned.address(), owner.identity(), "need access")
        .await?;
    let incoming = owner.node.list_incoming().await?;
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0].id, request.id);
    assert!(incoming[0].is_pending());

    owner.node.grant(request.id, None).await?;
    let grant = owner
        .node
        .registry()
        .lookup(&owned.address(), &requester.identity())
        .context("grant not installed")?;
    assert_eq!(grant.expires_at, net.now() + 48 * 3_600_000);
    assert_eq!(
        owner.node.list_incoming().await?[0].status,
        RequestStatus::Granted
    );

    wait_for_event(&mut events, is_granted)
        .await
        .context("requester never saw the grant")?;
    assert!(requester
        .node
        .has_permission(owned.address(), owner.identity())
        .await?);

    net.advance(Duration::from_secs(1));
    replica.set("k", value("v")).await?;
    assert_eq!(owned.get("k").await?, Some(value("v")));
    assert_eq!(replica.get("k").await?, Some(value("v")));

    net.advance(49 * HOUR);
    replica.set("k2", value("v2")).await?;
    assert_eq!(owned.get("k2").await?, None);
    assert_eq!(replica.get("k2").await?, None);
    assert!(!requester
        .node
        .has_permission(owned.address(), owner.identity())
        .await?);
    Ok(())
}

#[tokio::test]
async fn only_the_granted_requester_writes() -> anyhow::Result<()> {
    init_tracing();
    let net = TestNetwork::new();
    let owner = net.peer(1).await;
    let r1 = net.peer(2).await;
    let r2 = net.peer(3).await;

    let owned = owner.node.create_log("shared").await?;
    let replica1 = r1.node.open_log(owned.manifest().clone()).await?;
    let replica2 = r2.node.open_log(owned.manifest().clone()).await?;

    let req1 = r1.node.request(owned.address(), owner.identity(), "r1").await?;
    net.advance(HOUR);
    let req2 = r2.node.request(owned.address(), owner.identity(), "r2").await?;
    owner.node.grant(req1.id, None).await?;

    replica1.set("from-r1", value("1")).await?;
    replica2.set("from-r2", value("2")).await?;
    assert_eq!(owned.get("from-r1").await?, Some(value("1")));
    assert_eq!(owned.get("from-r2").await?, None);

    let pending: Vec<_> = owner
        .node
        .list_incoming()
        .await?
        .into_iter()
        .filter(|r| r.is_pending())
        .collect();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, req2.id);

    // The first record expires on its own schedule, the second an hour later.
    net.advance(47 * HOUR);
    assert_eq!(owner.node.sweep_expired().await?, 1);
    let left = owner.node.list_incoming().await?;
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].id, req2.id);

    net.advance(HOUR);
    assert_eq!(owner.node.sweep_expired().await?, 1);
    assert!(owner.node.list_incoming().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn revoke_takes_effect_before_expiry() -> anyhow::Result<()> {
    init_tracing();
    let net = TestNetwork::new();
    let owner = net.peer(1).await;
    let requester = net.peer(2).await;

    let owned = owner.node.create_log("shared").await?;
    let replica = requester.node.open_log(owned.manifest().clone()).await?;
    let mut events = requester.node.subscribe();

    let request = requester
        .node
        .request(owned.address(), owner.identity(), "")
        .await?;
    owner.node.grant(request.id, None).await?;
    wait_for_event(&mut events, is_granted)
        .await
        .context("grant not observed")?;

    replica.set("before", value("1")).await?;
    assert_eq!(owned.get("before").await?, Some(value("1")));

    let revoked = owner
        .node
        .revoke(owned.address(), requester.identity())
        .await?;
    assert!(revoked.is_some());
    assert!(owner.node.grants(&owned.address())?.is_empty());

    net.advance(Duration::from_secs(1));
    replica.set("after", value("2")).await?;
    assert_eq!(owned.get("after").await?, None);

    wait_for_event(&mut events, |e| {
        matches!(e, CoordinatorEvent::GrantRevoked { .. })
    })
    .await
    .context("revocation not observed")?;
    assert!(!requester
        .node
        .has_permission(owned.address(), owner.identity())
        .await?);
    Ok(())
}

#[tokio::test]
async fn owner_writes_regardless_of_grants() -> anyhow::Result<()> {
    let net = TestNetwork::new();
    let owner = net.peer(1).await;
    let others = [net.random_peer().await, net.random_peer().await];

    let owned = owner.node.create_log("shared").await?;
    owned.set("k", value("a")).await?;
    for other in &others {
        let request = other
            .node
            .request(owned.address(), owner.identity(), "")
            .await?;
        owner.node.grant(request.id, None).await?;
    }
    owner
        .node
        .revoke(owned.address(), others[0].identity())
        .await?;

    owned.set("k", value("b")).await?;
    assert_eq!(owned.get("k").await?, Some(value("b")));

    net.advance(72 * HOUR);
    owner.node.sweep_expired().await?;
    owned.set("k", value("c")).await?;
    assert_eq!(owned.get("k").await?, Some(value("c")));
    Ok(())
}

#[tokio::test]
async fn grants_survive_owner_restart() -> anyhow::Result<()> {
    init_tracing();
    let net = TestNetwork::new();
    let owner = net.peer(1).await;
    let requester = net.peer(2).await;
    let late = net.stopped_peer(3);

    let owned = owner.node.create_log("shared").await?;
    let replica = requester.node.open_log(owned.manifest().clone()).await?;
    let request = requester
        .node
        .request(owned.address(), owner.identity(), "")
        .await?;
    owner.node.grant(request.id, None).await?;

    owner.node.shutdown().await;
    assert!(owner.node.grants(&owned.address())?.is_empty());
    owner.node.start().await?;

    let grants = owner.node.grants(&owned.address())?;
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].grantee, requester.identity());
    assert_eq!(grants[0].expires_at, request.expires_at);

    net.advance(Duration::from_secs(1));
    replica.set("k", value("v")).await?;
    assert_eq!(owned.get("k").await?, Some(value("v")));

    // A peer started afterwards holds no grant of its own for the log.
    late.node.start().await?;
    assert!(!late
        .node
        .has_permission(owned.address(), owner.identity())
        .await?);
    Ok(())
}

#[tokio::test]
async fn repeated_request_returns_same_id() -> anyhow::Result<()> {
    let net = TestNetwork::new();
    let owner = net.peer(1).await;
    let requester = net.peer(2).await;
    let owned = owner.node.create_log("shared").await?;

    let first = requester
        .node
        .request(owned.address(), owner.identity(), "one")
        .await?;
    net.advance(Duration::from_secs(30));
    let second = requester
        .node
        .request(owned.address(), owner.identity(), "two")
        .await?;
    assert_eq!(first.id, second.id);
    assert_eq!(requester.node.list_outgoing().await?.len(), 1);

    // Still idempotent once granted and unexpired.
    owner.node.grant(first.id, None).await?;
    let third = requester
        .node
        .request(owned.address(), owner.identity(), "three")
        .await?;
    assert_eq!(third.id, first.id);
    Ok(())
}

#[tokio::test]
async fn decisions_are_never_overwritten() -> anyhow::Result<()> {
    let net = TestNetwork::new();
    let owner = net.peer(1).await;
    let requester = net.peer(2).await;
    let owned = owner.node.create_log("shared").await?;

    let request = requester
        .node
        .request(owned.address(), owner.identity(), "")
        .await?;
    owner
        .node
        .decide(request.id, Outcome::Denied, owner.identity(), Some("no".into()))
        .await?;

    let err = owner
        .node
        .decide(request.id, Outcome::Granted, owner.identity(), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        NodeError::Permission(PermsError::AlreadyDecided(_))
    ));

    let stored = owner.node.list_incoming().await?;
    assert_eq!(stored[0].status, RequestStatus::Denied);
    assert_eq!(stored[0].decision_reason.as_deref(), Some("no"));
    assert!(owner.node.grants(&owned.address())?.is_empty());

    // Only the owner's own coordinator may decide.
    let err = owner
        .node
        .decide(request.id, Outcome::Granted, requester.identity(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::Permission(PermsError::Unauthorized(_))));
    Ok(())
}

#[tokio::test]
async fn late_replica_rechecks_history() -> anyhow::Result<()> {
    let net = TestNetwork::new();
    let owner = net.peer(1).await;
    let requester = net.peer(2).await;
    let late = net.peer(3).await;

    let owned = owner.node.create_log("shared").await?;
    let replica = requester.node.open_log(owned.manifest().clone()).await?;
    let request = requester
        .node
        .request(owned.address(), owner.identity(), "")
        .await?;
    owner.node.grant(request.id, None).await?;

    owned.set("by-owner", value("o")).await?;
    replica.set("by-requester", value("r")).await?;
    assert_eq!(owned.get("by-requester").await?, Some(value("r")));

    // The late peer holds no grants, so only the owner's history survives.
    let late_replica = late.node.open_log(owned.manifest().clone()).await?;
    assert_eq!(late_replica.get("by-owner").await?, Some(value("o")));
    assert_eq!(late_replica.get("by-requester").await?, None);
    Ok(())
}

#[tokio::test]
async fn auto_grant_policy_decides_without_owner() -> anyhow::Result<()> {
    let net = TestNetwork::new();
    let owner = net.peer(1).await;
    let requester = net.peer(2).await;
    let owned = owner.node.create_log("shared").await?;
    let replica = requester.node.open_log(owned.manifest().clone()).await?;

    owner
        .node
        .set_policy(Arc::new(AutoGrant::new([requester.identity()]).for_logs([owned.address()])));
    let mut events = requester.node.subscribe();

    requester
        .node
        .request(owned.address(), owner.identity(), "")
        .await?;
    wait_for_event(&mut events, is_granted)
        .await
        .context("auto-grant not observed")?;

    replica.set("k", value("v")).await?;
    assert_eq!(owned.get("k").await?, Some(value("v")));
    Ok(())
}

#[tokio::test]
async fn blocked_identity_is_denied_despite_grant() -> anyhow::Result<()> {
    let net = TestNetwork::new();
    let requester = net.peer(2).await;

    let verifier = Arc::new(DenyListVerifier::new(KeyVerifier));
    let keypair = portcullis::Keypair::from_seed(&[1; 32]);
    let clock: Arc<dyn portcullis::Clock> = net.clock.clone();
    let owner = Node::with_verifier(
        net.network.runtime(keypair.clone(), Arc::clone(&clock)),
        clock,
        verifier.clone(),
        NodeConfig::default(),
    );
    owner.start().await?;

    let owned = owner.create_log("shared").await?;
    let replica = requester.node.open_log(owned.manifest().clone()).await?;
    let request = requester
        .node
        .request(owned.address(), owner.identity(), "")
        .await?;
    owner.grant(request.id, None).await?;

    verifier.block(requester.identity());
    replica.set("k", value("v")).await?;
    assert_eq!(owned.get("k").await?, None);

    verifier.unblock(&requester.identity());
    net.advance(Duration::from_secs(1));
    replica.set("k", value("v")).await?;
    assert_eq!(owned.get("k").await?, Some(value("v")));
    Ok(())
}
