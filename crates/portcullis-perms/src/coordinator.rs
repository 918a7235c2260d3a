//! The permission coordinator.
//!
//! One coordinator runs per peer. It owns the peer's mailbox, creates
//! requests in other peers' mailboxes, decides incoming requests, and keeps
//! the grant registry in step with those decisions.
//!
//! All reactions to mailbox changes happen on a single dispatcher task that
//! consumes the logs' typed change notifications. Public operations run on
//! the caller's task and report failures synchronously.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use portcullis_core::{Clock, EntryId, EntryOp, Identity, LogAddress};
use portcullis_log::{LogEvent, LogRuntime};

use crate::config::CoordinatorConfig;
use crate::error::{PermsError, Result};
use crate::grant::Grant;
use crate::mailbox::RequestMailbox;
use crate::policy::{DecisionPolicy, Manual};
use crate::registry::GrantRegistry;
use crate::request::{Outcome, PermissionRequest, RequestId, RequestStatus};
use crate::state::{transition, InvalidTransition, RequestEvent, RequestState};
use crate::verifier::IdentityVerifier;

type Mailbox<R> = RequestMailbox<<R as LogRuntime>::Log>;

/// Notifications for the application layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorEvent {
    /// A new pending request arrived in this peer's mailbox.
    IncomingRequest(PermissionRequest),
    /// A request was granted. Emitted on the owner when it decides and on
    /// the requester when it observes the decision.
    RequestGranted(PermissionRequest),
    /// A request was denied. Emitted on both sides like `RequestGranted`.
    RequestDenied(PermissionRequest),
    /// An expired record was swept from this peer's mailbox.
    RequestExpired(PermissionRequest),
    /// A grant this peer held was withdrawn by the log's owner.
    GrantRevoked {
        /// The protected log.
        log: LogAddress,
        /// The identity that lost access.
        grantee: Identity,
    },
}

/// Drives the request/decision protocol for one local identity.
pub struct PermissionCoordinator<R: LogRuntime> {
    inner: Arc<Inner<R>>,
    dispatcher: Mutex<Option<Dispatcher>>,
}

struct Dispatcher {
    task: JoinHandle<()>,
    shutdown: Arc<Notify>,
}

struct Inner<R: LogRuntime> {
    identity: Identity,
    runtime: Arc<R>,
    registry: Arc<GrantRegistry>,
    verifier: Arc<dyn IdentityVerifier>,
    clock: Arc<dyn Clock>,
    config: CoordinatorConfig,
    policy: RwLock<Arc<dyn DecisionPolicy>>,

    /// This peer's own mailbox, once started.
    own: RwLock<Option<Arc<Mailbox<R>>>>,
    /// Replicas of other peers' mailboxes.
    remotes: RwLock<HashMap<Identity, Arc<Mailbox<R>>>>,

    /// Local dedup index: latest request per (requester, log).
    outgoing: Mutex<HashMap<(Identity, LogAddress), RequestId>>,
    /// Incoming requests already surfaced.
    surfaced: Mutex<HashSet<RequestId>>,
    /// Outgoing requests whose decision has been observed, with their expiry.
    settled: Mutex<HashMap<RequestId, i64>>,
    /// Grants mirrored from remote mailboxes, by mailbox key.
    mirrored: Mutex<HashMap<String, Mirror>>,
    /// Held for the whole read-check-write of a decision.
    deciding: AsyncMutex<()>,

    events: broadcast::Sender<CoordinatorEvent>,
    remote_tx: Mutex<Option<mpsc::UnboundedSender<RemoteSignal>>>,
    forwarders: Mutex<Vec<JoinHandle<()>>>,
}

/// A granted record this peer mirrors into its own registry.
#[derive(Debug, Clone, Copy)]
struct Mirror {
    log: LogAddress,
    expires_at: i64,
}

/// A change in a remote mailbox, tagged with the mailbox owner.
struct RemoteSignal {
    owner: Identity,
    kind: SignalKind,
}

enum SignalKind {
    Event(LogEvent),
    Lagged(u64),
}

impl<R: LogRuntime> PermissionCoordinator<R> {
    /// Create a stopped coordinator.
    ///
    /// `registry` must be the same registry the peer's access gates consult.
    pub fn new(
        runtime: Arc<R>,
        registry: Arc<GrantRegistry>,
        verifier: Arc<dyn IdentityVerifier>,
        clock: Arc<dyn Clock>,
        config: CoordinatorConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let inner = Inner {
            identity: runtime.identity(),
            runtime,
            registry,
            verifier,
            clock,
            config,
            policy: RwLock::new(Arc::new(Manual)),
            own: RwLock::new(None),
            remotes: RwLock::new(HashMap::new()),
            outgoing: Mutex::new(HashMap::new()),
            surfaced: Mutex::new(HashSet::new()),
            settled: Mutex::new(HashMap::new()),
            mirrored: Mutex::new(HashMap::new()),
            deciding: AsyncMutex::new(()),
            events,
            remote_tx: Mutex::new(None),
            forwarders: Mutex::new(Vec::new()),
        };
        Self {
            inner: Arc::new(inner),
            dispatcher: Mutex::new(None),
        }
    }

    /// The local identity.
    pub fn identity(&self) -> Identity {
        self.inner.identity
    }

    /// The grant registry this coordinator writes.
    pub fn registry(&self) -> &Arc<GrantRegistry> {
        &self.inner.registry
    }

    /// The active configuration.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    /// Replace the automated decision policy.
    pub fn set_policy(&self, policy: Arc<dyn DecisionPolicy>) {
        *self.inner.policy.write().unwrap_or_else(PoisonError::into_inner) = policy;
    }

    /// Whether the dispatcher is running.
    pub fn is_running(&self) -> bool {
        lock(&self.dispatcher).is_some()
    }

    /// Open the own mailbox, sweep it, and spawn the dispatcher.
    ///
    /// Grants backed by unexpired granted records are re-installed, both for
    /// the own mailbox and for decisions observed in connected mailboxes.
    /// Calling `start` on a running coordinator does nothing.
    pub async fn start(&self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        let inner = &self.inner;

        let own = match inner.own_mailbox() {
            Ok(own) => own,
            Err(_) => {
                let own = Arc::new(
                    RequestMailbox::open(
                        &*inner.runtime,
                        inner.identity,
                        Arc::clone(&inner.verifier),
                        Arc::clone(&inner.clock),
                    )
                    .await?,
                );
                *inner.own.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&own));
                own
            }
        };
        let own_rx = own.subscribe();

        inner.sweep_expired().await?;
        inner.reconcile_own().await?;

        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&inner.remote_tx) = Some(tx.clone());
        let remotes: Vec<_> = inner
            .remotes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(owner, mailbox)| (*owner, mailbox.subscribe()))
            .collect();
        for (owner, events) in remotes {
            inner.spawn_forwarder(owner, events, tx.clone());
        }
        inner.reconcile_remotes().await?;

        let shutdown = Arc::new(Notify::new());
        let task = tokio::spawn(run(
            Arc::clone(inner),
            own_rx,
            rx,
            Arc::clone(&shutdown),
        ));

        let mut dispatcher = lock(&self.dispatcher);
        if dispatcher.is_some() {
            // Lost a race with a concurrent start.
            task.abort();
            return Ok(());
        }
        *dispatcher = Some(Dispatcher { task, shutdown });
        tracing::info!(identity = %inner.identity, mailbox = %own.address(), "coordinator started");
        Ok(())
    }

    /// Stop the dispatcher and drop every grant until the next `start`.
    pub async fn shutdown(&self) {
        let dispatcher = lock(&self.dispatcher).take();
        if let Some(dispatcher) = dispatcher {
            dispatcher.shutdown.notify_one();
            if let Err(e) = dispatcher.task.await {
                tracing::warn!(error = %e, "dispatcher ended abnormally");
            }
        }
        self.inner.stop_forwarders();
        self.inner.registry.clear();
        lock(&self.inner.settled).clear();
        lock(&self.inner.mirrored).clear();
        tracing::info!(identity = %self.inner.identity, "coordinator stopped");
    }

    /// Replicate `owner`'s mailbox and watch it for decisions.
    pub async fn connect(&self, owner: Identity) -> Result<Arc<Mailbox<R>>> {
        self.inner.connect(owner).await
    }

    /// Ask `owner` for write access to `log`.
    ///
    /// Returns the existing record if this peer already has an unexpired
    /// pending or granted request for `log`. Otherwise appends a new pending
    /// record to `owner`'s mailbox and waits for the local replica to confirm
    /// it. A missing confirmation is logged, not returned.
    pub async fn request(
        &self,
        log: LogAddress,
        owner: Identity,
        reason: impl Into<String>,
    ) -> Result<PermissionRequest> {
        self.inner.request(log, owner, reason.into()).await
    }

    /// Record a decision on a request in this peer's mailbox.
    ///
    /// Only the mailbox owner may decide. Fails without side effects if the
    /// request is unknown, expired, or already decided. Granting installs a
    /// grant for the rest of the request's lifetime.
    pub async fn decide(
        &self,
        id: RequestId,
        outcome: Outcome,
        decider: Identity,
        reason: Option<String>,
    ) -> Result<PermissionRequest> {
        self.inner.decide(id, outcome, decider, reason).await
    }

    /// Grant a request as the local identity.
    pub async fn grant(&self, id: RequestId, reason: Option<String>) -> Result<PermissionRequest> {
        self.decide(id, Outcome::Granted, self.identity(), reason).await
    }

    /// Deny a request as the local identity.
    pub async fn deny(&self, id: RequestId, reason: Option<String>) -> Result<PermissionRequest> {
        self.decide(id, Outcome::Denied, self.identity(), reason).await
    }

    /// Withdraw `grantee`'s access to `log` immediately.
    ///
    /// Also removes the matching granted records from the own mailbox, so the
    /// grantee stops treating itself as authorized.
    pub async fn revoke(&self, log: LogAddress, grantee: Identity) -> Result<Option<Grant>> {
        self.inner.revoke(log, grantee).await
    }

    /// Tombstone every expired record in the own mailbox and sweep the
    /// registry. Returns the number of records removed.
    pub async fn sweep_expired(&self) -> Result<usize> {
        self.inner.sweep_expired().await
    }

    /// Unexpired requests addressed to this peer, oldest first.
    pub async fn list_incoming(&self) -> Result<Vec<PermissionRequest>> {
        self.inner.list_incoming().await
    }

    /// Unexpired requests made by this peer, across every connected mailbox.
    pub async fn list_outgoing(&self) -> Result<Vec<PermissionRequest>> {
        self.inner.list_outgoing().await
    }

    /// Whether this peer may write `log`, owned by `owner`.
    pub async fn has_permission(&self, log: LogAddress, owner: Identity) -> Result<bool> {
        self.inner.has_permission(log, owner).await
    }

    /// Subscribe to coordinator notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.inner.events.subscribe()
    }
}

impl<R: LogRuntime> Drop for PermissionCoordinator<R> {
    fn drop(&mut self) {
        if let Some(dispatcher) = lock(&self.dispatcher).take() {
            dispatcher.task.abort();
        }
        self.inner.stop_forwarders();
    }
}

impl<R: LogRuntime> std::fmt::Debug for PermissionCoordinator<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionCoordinator")
            .field("identity", &self.inner.identity)
            .field("running", &self.is_running())
            .finish()
    }
}

/// The dispatcher loop.
async fn run<R: LogRuntime>(
    inner: Arc<Inner<R>>,
    mut own_rx: broadcast::Receiver<LogEvent>,
    mut remote_rx: mpsc::UnboundedReceiver<RemoteSignal>,
    shutdown: Arc<Notify>,
) {
    let period = inner.config.sweep_interval.max(Duration::from_millis(1));
    let mut sweep = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            event = own_rx.recv() => match event {
                Ok(event) => {
                    if let Err(e) = inner.on_own_event(event).await {
                        tracing::warn!(error = %e, "failed to handle own mailbox event");
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "own mailbox events lagged, reconciling");
                    if let Err(e) = inner.reconcile_own().await {
                        tracing::warn!(error = %e, "reconcile failed");
                    }
                }
                Err(RecvError::Closed) => {
                    tracing::debug!("own mailbox closed");
                    break;
                }
            },
            Some(signal) = remote_rx.recv() => {
                if let Err(e) = inner.on_remote_signal(signal).await {
                    tracing::warn!(error = %e, "failed to handle remote mailbox event");
                }
            }
            _ = sweep.tick() => {
                if let Err(e) = inner.sweep_expired().await {
                    tracing::warn!(error = %e, "periodic sweep failed");
                }
            }
            _ = inner.registry.sweep_requested() => {
                inner.registry.sweep();
            }
        }
    }
    tracing::debug!(identity = %inner.identity, "dispatcher exited");
}

impl<R: LogRuntime> Inner<R> {
    fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    fn emit(&self, event: CoordinatorEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn own_mailbox(&self) -> Result<Arc<Mailbox<R>>> {
        self.own
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(PermsError::NotRunning)
    }

    fn remote_mailbox(&self, owner: &Identity) -> Option<Arc<Mailbox<R>>> {
        self.remotes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(owner)
            .cloned()
    }

    fn policy(&self) -> Arc<dyn DecisionPolicy> {
        Arc::clone(&self.policy.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn spawn_forwarder(
        &self,
        owner: Identity,
        mut events: broadcast::Receiver<LogEvent>,
        tx: mpsc::UnboundedSender<RemoteSignal>,
    ) {
        let handle = tokio::spawn(async move {
            loop {
                let kind = match events.recv().await {
                    Ok(event) => SignalKind::Event(event),
                    Err(RecvError::Lagged(missed)) => SignalKind::Lagged(missed),
                    Err(RecvError::Closed) => break,
                };
                if tx.send(RemoteSignal { owner, kind }).is_err() {
                    break;
                }
            }
        });
        let mut forwarders = lock(&self.forwarders);
        forwarders.retain(|h| !h.is_finished());
        forwarders.push(handle);
    }

    fn stop_forwarders(&self) {
        lock(&self.remote_tx).take();
        for handle in lock(&self.forwarders).drain(..) {
            handle.abort();
        }
    }

    async fn connect(&self, owner: Identity) -> Result<Arc<Mailbox<R>>> {
        if owner == self.identity {
            return self.own_mailbox();
        }
        if let Some(mailbox) = self.remote_mailbox(&owner) {
            return Ok(mailbox);
        }

        let opened = Arc::new(
            RequestMailbox::open(
                &*self.runtime,
                owner,
                Arc::clone(&self.verifier),
                Arc::clone(&self.clock),
            )
            .await?,
        );

        let (mailbox, fresh) = {
            let mut remotes = self.remotes.write().unwrap_or_else(PoisonError::into_inner);
            match remotes.get(&owner) {
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    remotes.insert(owner, Arc::clone(&opened));
                    (opened, true)
                }
            }
        };
        if !fresh {
            return Ok(mailbox);
        }

        let tx = lock(&self.remote_tx).clone();
        if let Some(tx) = tx {
            self.spawn_forwarder(owner, mailbox.subscribe(), tx);
        }
        tracing::debug!(owner = %owner, mailbox = %mailbox.address(), "connected to mailbox");

        // Decisions made while we were away.
        self.reconcile_remote(&mailbox).await?;
        Ok(mailbox)
    }

    async fn request(
        &self,
        log: LogAddress,
        owner: Identity,
        reason: String,
    ) -> Result<PermissionRequest> {
        let requester = self.identity;
        if owner == requester {
            return Err(PermsError::Unauthorized(
                "a log's owner never needs to request access".to_string(),
            ));
        }
        let mailbox = self.connect(owner).await?;

        if let Some(existing) = self.existing_request(&mailbox, log).await? {
            let soft = PermsError::DuplicateRequest { requester, log };
            tracing::debug!(request = %existing.id, reason = %soft, "returning existing request");
            return Ok(existing);
        }

        let ttl = self.config.default_ttl;
        let mut requested_at = self.now();
        let record = loop {
            let candidate =
                PermissionRequest::new(requester, log, owner, reason.clone(), requested_at, ttl);
            if mailbox.get(&candidate.id).await?.is_none() {
                break candidate;
            }
            requested_at += 1;
        };

        let mut events = mailbox.subscribe();
        let entry_id = mailbox.put(&record).await?;
        lock(&self.outgoing).insert((requester, log), record.id);

        if let Err(e) = self.await_append(&mut events, entry_id, record.id).await {
            tracing::warn!(request = %record.id, error = %e, "continuing without confirmation");
        }

        tracing::info!(
            request = %record.id,
            log = %log,
            owner = %owner,
            expires_at = record.expires_at,
            "permission requested"
        );
        Ok(record)
    }

    /// An unexpired pending or granted request by us for `log`.
    async fn existing_request(
        &self,
        mailbox: &Mailbox<R>,
        log: LogAddress,
    ) -> Result<Option<PermissionRequest>> {
        let key = (self.identity, log);
        let now = self.now();
        let live = |r: &PermissionRequest| {
            r.requester == self.identity
                && r.log == log
                && !r.is_expired(now)
                && r.status != RequestStatus::Denied
        };

        let indexed = lock(&self.outgoing).get(&key).copied();
        if let Some(id) = indexed {
            match mailbox.get(&id).await? {
                Some(record) if live(&record) => return Ok(Some(record)),
                _ => {
                    lock(&self.outgoing).remove(&key);
                }
            }
        }

        let found = mailbox
            .records()
            .await?
            .into_iter()
            .filter(|r| live(r))
            .max_by_key(|r| r.requested_at);
        if let Some(record) = &found {
            lock(&self.outgoing).insert(key, record.id);
        }
        Ok(found)
    }

    /// Wait for the local replica to report `entry_id`.
    async fn await_append(
        &self,
        events: &mut broadcast::Receiver<LogEvent>,
        entry_id: EntryId,
        request: RequestId,
    ) -> Result<()> {
        let confirmed = async {
            loop {
                match events.recv().await {
                    Ok(LogEvent::Update { entry_id: id, .. }) if id == entry_id => return true,
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return false,
                }
            }
        };
        match tokio::time::timeout(self.config.replication_timeout, confirmed).await {
            Ok(true) => Ok(()),
            _ => Err(PermsError::ReplicationTimeout(request)),
        }
    }

    async fn decide(
        &self,
        id: RequestId,
        outcome: Outcome,
        decider: Identity,
        reason: Option<String>,
    ) -> Result<PermissionRequest> {
        let own = self.own_mailbox()?;
        if decider != self.identity {
            return Err(PermsError::Unauthorized(format!(
                "{decider} cannot decide requests for {}",
                self.identity
            )));
        }

        let _deciding = self.deciding.lock().await;
        let record = own.get(&id).await?.ok_or(PermsError::NotFound(id))?;
        if record.owner != self.identity {
            return Err(PermsError::Unauthorized(format!(
                "request {id} is addressed to {}",
                record.owner
            )));
        }

        let now = self.now();
        let event = match outcome {
            Outcome::Granted => RequestEvent::Grant,
            Outcome::Denied => RequestEvent::Deny,
        };
        match transition(record.state(now), event) {
            Ok(_) => {}
            Err(InvalidTransition {
                from: RequestState::Expired,
                ..
            }) => return Err(PermsError::Expired(id)),
            Err(InvalidTransition { from, .. }) if from.is_decided() => {
                return Err(PermsError::AlreadyDecided(id))
            }
            Err(e) => return Err(e.into()),
        }
        if outcome == Outcome::Granted && !self.verifier.verify(&record.requester).await {
            return Err(PermsError::VerificationFailure(record.requester));
        }

        let decided = record.decided(outcome, decider, now, reason);
        own.put(&decided).await?;
        // The mailbox gate refuses a decision over a decided record.
        if own.get(&id).await?.as_ref() != Some(&decided) {
            return Err(PermsError::AlreadyDecided(id));
        }

        match outcome {
            Outcome::Granted => {
                self.extend_grant(decided.log, decided.requester, decided.expires_at);
                self.emit(CoordinatorEvent::RequestGranted(decided.clone()));
            }
            Outcome::Denied => {
                self.emit(CoordinatorEvent::RequestDenied(decided.clone()));
            }
        }
        tracing::info!(
            request = %id,
            requester = %decided.requester,
            log = %decided.log,
            outcome = ?outcome,
            "request decided"
        );
        Ok(decided)
    }

    async fn revoke(&self, log: LogAddress, grantee: Identity) -> Result<Option<Grant>> {
        let removed = self.registry.revoke(log, grantee);

        if let Ok(own) = self.own_mailbox() {
            for record in own.records().await? {
                if record.requester == grantee
                    && record.log == log
                    && record.status == RequestStatus::Granted
                {
                    own.remove(&record.id).await?;
                    tracing::debug!(request = %record.id, "removed revoked grant record");
                }
            }
        }
        Ok(removed)
    }

    async fn sweep_expired(&self) -> Result<usize> {
        let now = self.now();
        let mut removed = 0;

        if let Ok(own) = self.own_mailbox() {
            for record in own.records().await? {
                if !record.is_expired(now) {
                    continue;
                }
                own.remove(&record.id).await?;
                lock(&self.surfaced).remove(&record.id);
                self.emit(CoordinatorEvent::RequestExpired(record));
                removed += 1;
            }
        }

        lock(&self.settled).retain(|_, expires_at| *expires_at > now);
        lock(&self.mirrored).retain(|_, mirror| mirror.expires_at > now);

        let grants = self.registry.sweep();
        if removed > 0 || grants > 0 {
            tracing::info!(records = removed, grants, "swept expired");
        }
        Ok(removed)
    }

    async fn list_incoming(&self) -> Result<Vec<PermissionRequest>> {
        let own = self.own_mailbox()?;
        let now = self.now();
        let mut records: Vec<_> = own
            .records()
            .await?
            .into_iter()
            .filter(|r| r.owner == self.identity && !r.is_expired(now))
            .collect();
        records.sort_by_key(|r| (r.requested_at, r.id));
        Ok(records)
    }

    async fn list_outgoing(&self) -> Result<Vec<PermissionRequest>> {
        let mailboxes: Vec<_> = self
            .remotes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let now = self.now();
        let mut records = Vec::new();
        for mailbox in mailboxes {
            records.extend(
                mailbox
                    .records()
                    .await?
                    .into_iter()
                    .filter(|r| r.requester == self.identity && !r.is_expired(now)),
            );
        }
        records.sort_by_key(|r| (r.requested_at, r.id));
        Ok(records)
    }

    async fn has_permission(&self, log: LogAddress, owner: Identity) -> Result<bool> {
        let me = self.identity;
        if owner == me || self.registry.is_authorized(&log, &me) {
            return Ok(true);
        }
        let Some(mailbox) = self.remote_mailbox(&owner) else {
            return Ok(false);
        };
        let now = self.now();
        Ok(mailbox.records().await?.iter().any(|r| {
            r.requester == me
                && r.log == log
                && r.status == RequestStatus::Granted
                && !r.is_expired(now)
        }))
    }

    async fn on_own_event(&self, event: LogEvent) -> Result<()> {
        match event {
            LogEvent::Update {
                key,
                op: EntryOp::Put,
                ..
            } => {
                let own = self.own_mailbox()?;
                if let Some(record) = own.get_key(&key).await? {
                    self.surface(record).await;
                }
            }
            LogEvent::Update { .. } => {}
            LogEvent::Join { peer } => {
                tracing::debug!(peer = %peer, "peer joined own mailbox");
            }
            LogEvent::Error { message } => {
                tracing::warn!(%message, "own mailbox reported an error");
            }
        }
        Ok(())
    }

    /// Re-install grants for live granted records and surface every
    /// undecided one.
    async fn reconcile_own(&self) -> Result<()> {
        let own = self.own_mailbox()?;
        let now = self.now();
        for record in own.records().await? {
            if record.owner == self.identity
                && record.status == RequestStatus::Granted
                && !record.is_expired(now)
            {
                self.extend_grant(record.log, record.requester, record.expires_at);
                continue;
            }
            self.surface(record).await;
        }
        Ok(())
    }

    /// Observe decisions on our requests in every connected mailbox.
    async fn reconcile_remotes(&self) -> Result<()> {
        let mailboxes: Vec<_> = self
            .remotes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for mailbox in mailboxes {
            self.reconcile_remote(&mailbox).await?;
        }
        Ok(())
    }

    async fn reconcile_remote(&self, mailbox: &Mailbox<R>) -> Result<()> {
        for record in mailbox.records().await? {
            if record.requester == self.identity {
                self.observe_outgoing(&record);
            }
        }
        Ok(())
    }

    /// Grant `grantee` access to `log` until `expires_at`, unless a grant
    /// lasting at least as long is already installed.
    fn extend_grant(&self, log: LogAddress, grantee: Identity, expires_at: i64) {
        let now = self.now();
        if self
            .registry
            .lookup(&log, &grantee)
            .is_some_and(|grant| grant.expires_at >= expires_at)
        {
            return;
        }
        self.registry.grant(log, grantee, until(now, expires_at));
    }

    /// Announce a new incoming pending request and offer it to the policy.
    async fn surface(&self, record: PermissionRequest) {
        if record.owner != self.identity
            || !record.is_pending()
            || record.is_expired(self.now())
        {
            return;
        }
        if !lock(&self.surfaced).insert(record.id) {
            return;
        }

        tracing::info!(
            request = %record.id,
            requester = %record.requester,
            log = %record.log,
            "incoming permission request"
        );
        self.emit(CoordinatorEvent::IncomingRequest(record.clone()));

        let policy = self.policy();
        if let Some(decision) = policy.evaluate(&record).await {
            if let Err(e) = self
                .decide(record.id, decision.outcome, self.identity, decision.reason)
                .await
            {
                tracing::debug!(request = %record.id, error = %e, "policy decision not applied");
            }
        }
    }

    async fn on_remote_signal(&self, signal: RemoteSignal) -> Result<()> {
        let Some(mailbox) = self.remote_mailbox(&signal.owner) else {
            return Ok(());
        };
        match signal.kind {
            SignalKind::Event(LogEvent::Update { key, .. }) => match mailbox.get_key(&key).await? {
                Some(record) if record.requester == self.identity => {
                    self.observe_outgoing(&record);
                }
                Some(_) => {}
                None => self.forget_mirror(&key),
            },
            SignalKind::Event(LogEvent::Join { peer }) => {
                tracing::debug!(owner = %signal.owner, peer = %peer, "peer joined remote mailbox");
            }
            SignalKind::Event(LogEvent::Error { message }) => {
                tracing::warn!(owner = %signal.owner, %message, "remote mailbox reported an error");
            }
            SignalKind::Lagged(missed) => {
                tracing::warn!(owner = %signal.owner, missed, "remote mailbox events lagged, reconciling");
                self.reconcile_remote(&mailbox).await?;
            }
        }
        Ok(())
    }

    /// React to a decision on one of our own requests.
    ///
    /// A granted record can only have been written by the mailbox owner, so
    /// it is mirrored into the local registry. That lets this peer's replica
    /// of the protected log accept its own writes.
    fn observe_outgoing(&self, record: &PermissionRequest) {
        let now = self.now();
        if record.is_pending() || record.is_expired(now) {
            return;
        }
        if lock(&self.settled)
            .insert(record.id, record.expires_at)
            .is_some()
        {
            return;
        }

        match record.status {
            RequestStatus::Granted => {
                self.extend_grant(record.log, self.identity, record.expires_at);
                lock(&self.mirrored).insert(
                    record.key(),
                    Mirror {
                        log: record.log,
                        expires_at: record.expires_at,
                    },
                );
                self.emit(CoordinatorEvent::RequestGranted(record.clone()));
            }
            RequestStatus::Denied => {
                self.emit(CoordinatorEvent::RequestDenied(record.clone()));
            }
            RequestStatus::Pending => {}
        }
        tracing::info!(request = %record.id, status = ?record.status, "request settled");
    }

    /// Drop a mirrored grant whose record was removed by its owner.
    ///
    /// Another live granted record for the same log keeps the grant, cut
    /// back to that record's expiry.
    fn forget_mirror(&self, key: &str) {
        if let Ok(id) = RequestId::from_hex(key) {
            lock(&self.settled).remove(&id);
        }
        let now = self.now();
        let (log, still_covered) = {
            let mut mirrored = lock(&self.mirrored);
            let Some(gone) = mirrored.remove(key) else {
                return;
            };
            let still_covered = mirrored
                .values()
                .filter(|m| m.log == gone.log && m.expires_at > now)
                .map(|m| m.expires_at)
                .max();
            (gone.log, still_covered)
        };

        if let Some(expires_at) = still_covered {
            self.registry.grant(log, self.identity, until(now, expires_at));
            tracing::debug!(log = %log, expires_at, "mirrored grant kept by another record");
            return;
        }

        let removed = self.registry.revoke(log, self.identity);
        // Records swept after expiry are not revocations.
        if removed.is_some_and(|grant| grant.is_live(now)) {
            self.emit(CoordinatorEvent::GrantRevoked {
                log,
                grantee: self.identity,
            });
        }
    }
}

/// Time from `now` until `expires_at`, zero if already past.
fn until(now: i64, expires_at: i64) -> Duration {
    Duration::from_millis(expires_at.saturating_sub(now).max(0) as u64)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
