//! The Node: one peer's view of Portcullis.
//!
//! A Node wires a log runtime, a grant registry, access gates and a
//! permission coordinator together for a single local identity.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use portcullis_core::{Clock, Identity, LogAddress, LogKind, LogManifest};
use portcullis_log::{LogRuntime, ReplicatedLog};
use portcullis_perms::{
    AccessGate, CoordinatorConfig, CoordinatorEvent, DecisionPolicy, Grant, GrantRegistry,
    IdentityVerifier, KeyVerifier, Outcome, PermissionCoordinator, PermissionRequest, RequestId,
};

use crate::error::{NodeError, Result};

/// Configuration for the Node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Coordinator tunables.
    pub coordinator: CoordinatorConfig,
}

/// One peer.
///
/// Provides a unified API for:
/// - Creating owned logs and replicating other peers' logs
/// - Requesting, deciding and revoking write access
/// - Querying the state of requests and grants
pub struct Node<R: LogRuntime> {
    runtime: Arc<R>,
    registry: Arc<GrantRegistry>,
    verifier: Arc<dyn IdentityVerifier>,
    clock: Arc<dyn Clock>,
    coordinator: PermissionCoordinator<R>,
    config: NodeConfig,
    /// Data logs opened through this node.
    logs: RwLock<HashMap<LogAddress, Arc<R::Log>>>,
}

impl<R: LogRuntime> Node<R> {
    /// Create a node that accepts any well-formed identity.
    pub fn new(runtime: R, clock: Arc<dyn Clock>, config: NodeConfig) -> Self {
        Self::with_verifier(runtime, clock, Arc::new(KeyVerifier), config)
    }

    /// Create a node with a custom identity verifier.
    pub fn with_verifier(
        runtime: R,
        clock: Arc<dyn Clock>,
        verifier: Arc<dyn IdentityVerifier>,
        config: NodeConfig,
    ) -> Self {
        let runtime = Arc::new(runtime);
        let registry = Arc::new(GrantRegistry::new(Arc::clone(&clock)));
        let coordinator = PermissionCoordinator::new(
            Arc::clone(&runtime),
            Arc::clone(&registry),
            Arc::clone(&verifier),
            Arc::clone(&clock),
            config.coordinator.clone(),
        );
        Self {
            runtime,
            registry,
            verifier,
            clock,
            coordinator,
            config,
            logs: RwLock::new(HashMap::new()),
        }
    }

    /// Get the node's identity.
    pub fn identity(&self) -> Identity {
        self.runtime.identity()
    }

    /// Get the log runtime.
    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }

    /// Get the grant registry.
    pub fn registry(&self) -> &Arc<GrantRegistry> {
        &self.registry
    }

    /// Get the permission coordinator.
    pub fn coordinator(&self) -> &PermissionCoordinator<R> {
        &self.coordinator
    }

    /// Get the configuration.
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Open the own mailbox and start reacting to requests and decisions.
    pub async fn start(&self) -> Result<()> {
        self.coordinator.start().await?;
        Ok(())
    }

    /// Stop the coordinator. Every grant held by this node is dropped until
    /// the next `start` re-installs those still backed by granted records.
    pub async fn shutdown(&self) {
        self.coordinator.shutdown().await;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logs
    // ─────────────────────────────────────────────────────────────────────────

    /// Create (or reopen) a protected data log owned by this node.
    pub async fn create_log(&self, name: &str) -> Result<Arc<R::Log>> {
        self.open_log(LogManifest::data(self.identity(), name)).await
    }

    /// Open a replica of a protected data log.
    ///
    /// The replica is governed by this node's own access gate: it accepts
    /// the owner's writes and writes from identities holding a live grant in
    /// this node's registry.
    pub async fn open_log(&self, manifest: LogManifest) -> Result<Arc<R::Log>> {
        let address = manifest.address();
        if manifest.kind != LogKind::Data {
            return Err(NodeError::NotADataLog(address));
        }

        let gate = Arc::new(AccessGate::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.verifier),
            Arc::clone(&self.clock),
        ));
        let log = self.runtime.open(manifest, gate).await?;
        self.logs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address, Arc::clone(&log));
        tracing::debug!(log = %address, "opened protected log");
        Ok(log)
    }

    /// A data log previously opened through this node.
    pub fn log(&self, address: &LogAddress) -> Option<Arc<R::Log>> {
        self.logs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .cloned()
    }

    /// Live grants for a log owned by this node.
    pub fn grants(&self, log: &LogAddress) -> Result<Vec<Grant>> {
        self.require_owned(log)?;
        Ok(self.registry.list(log))
    }

    fn require_owned(&self, address: &LogAddress) -> Result<()> {
        let log = self.log(address).ok_or(NodeError::LogNotOpen(*address))?;
        if log.manifest().owner != self.identity() {
            return Err(NodeError::NotOwner(*address));
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Permissions
    // ─────────────────────────────────────────────────────────────────────────

    /// Replicate `owner`'s mailbox so decisions on our requests arrive.
    pub async fn connect(&self, owner: Identity) -> Result<()> {
        self.coordinator.connect(owner).await?;
        Ok(())
    }

    /// Ask `owner` for write access to `log`.
    pub async fn request(
        &self,
        log: LogAddress,
        owner: Identity,
        reason: impl Into<String>,
    ) -> Result<PermissionRequest> {
        Ok(self.coordinator.request(log, owner, reason).await?)
    }

    /// Decide a request in this node's mailbox.
    pub async fn decide(
        &self,
        id: RequestId,
        outcome: Outcome,
        decider: Identity,
        reason: Option<String>,
    ) -> Result<PermissionRequest> {
        Ok(self.coordinator.decide(id, outcome, decider, reason).await?)
    }

    /// Grant a request as this node.
    pub async fn grant(&self, id: RequestId, reason: Option<String>) -> Result<PermissionRequest> {
        Ok(self.coordinator.grant(id, reason).await?)
    }

    /// Deny a request as this node.
    pub async fn deny(&self, id: RequestId, reason: Option<String>) -> Result<PermissionRequest> {
        Ok(self.coordinator.deny(id, reason).await?)
    }

    /// Withdraw `grantee`'s access to a log this node owns.
    pub async fn revoke(&self, log: LogAddress, grantee: Identity) -> Result<Option<Grant>> {
        self.require_owned(&log)?;
        Ok(self.coordinator.revoke(log, grantee).await?)
    }

    /// Remove expired requests and grants now rather than at the next tick.
    pub async fn sweep_expired(&self) -> Result<usize> {
        Ok(self.coordinator.sweep_expired().await?)
    }

    /// Unexpired requests addressed to this node.
    pub async fn list_incoming(&self) -> Result<Vec<PermissionRequest>> {
        Ok(self.coordinator.list_incoming().await?)
    }

    /// Unexpired requests made by this node.
    pub async fn list_outgoing(&self) -> Result<Vec<PermissionRequest>> {
        Ok(self.coordinator.list_outgoing().await?)
    }

    /// Whether this node may write `log`, owned by `owner`.
    pub async fn has_permission(&self, log: LogAddress, owner: Identity) -> Result<bool> {
        Ok(self.coordinator.has_permission(log, owner).await?)
    }

    /// Install an automated decision policy.
    pub fn set_policy(&self, policy: Arc<dyn DecisionPolicy>) {
        self.coordinator.set_policy(policy);
    }

    /// Subscribe to request and grant notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.coordinator.subscribe()
    }
}
