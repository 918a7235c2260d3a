//! In-process implementation of the replicated log.
//!
//! This stands in for a real replication engine in tests and demos. Every
//! peer gets a [`MemoryRuntime`] on a shared [`MemoryNetwork`]; writes are
//! fanned out to every open replica of the target address, and each replica
//! runs its own access controller before applying anything.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{broadcast, Mutex, RwLock as AsyncRwLock};

use portcullis_core::{
    Clock, Entry, EntryBuilder, EntryId, Identity, Keypair, LogAddress, LogManifest,
};

use crate::error::{LogError, Result};
use crate::traits::{
    AccessController, AccessDecision, AppendAttempt, LogEvent, LogRuntime, ReplicatedLog,
};

/// Default capacity of each replica's event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Shared state for an in-process network of log replicas.
pub struct MemoryNetwork {
    /// Open replicas, by address.
    replicas: AsyncRwLock<HashMap<LogAddress, Vec<Weak<MemoryLog>>>>,
    /// Capacity of each replica's event channel.
    event_capacity: usize,
}

impl MemoryNetwork {
    /// Create a new memory network.
    pub fn new() -> Arc<Self> {
        Self::with_event_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Create a network whose replicas buffer `capacity` events each.
    pub fn with_event_capacity(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            replicas: AsyncRwLock::new(HashMap::new()),
            event_capacity: capacity.max(1),
        })
    }

    /// Create a runtime that opens replicas on this network as `keypair`.
    pub fn runtime(self: &Arc<Self>, keypair: Keypair, clock: Arc<dyn Clock>) -> MemoryRuntime {
        MemoryRuntime {
            keypair,
            clock,
            network: Arc::clone(self),
            logs: Mutex::new(HashMap::new()),
        }
    }

    /// Number of open replicas of `address`.
    pub async fn replica_count(&self, address: &LogAddress) -> usize {
        self.replicas_of(address).await.len()
    }

    /// Live replicas of `address`.
    async fn replicas_of(&self, address: &LogAddress) -> Vec<Arc<MemoryLog>> {
        let replicas = self.replicas.read().await;
        replicas
            .get(address)
            .map(|logs| {
                logs.iter()
                    .filter_map(Weak::upgrade)
                    .filter(|log| !log.is_closed())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Add `log` to the network, returning the replicas that were already open.
    async fn register(&self, log: &Arc<MemoryLog>) -> Vec<Arc<MemoryLog>> {
        let mut replicas = self.replicas.write().await;
        let slot = replicas.entry(log.address).or_default();
        slot.retain(|weak| weak.upgrade().map_or(false, |l| !l.is_closed()));
        let existing = slot.iter().filter_map(Weak::upgrade).collect();
        slot.push(Arc::downgrade(log));
        existing
    }

    /// Remove `log` from the network.
    async fn unregister(&self, log: &MemoryLog) {
        let mut replicas = self.replicas.write().await;
        if let Some(slot) = replicas.get_mut(&log.address) {
            slot.retain(|weak| weak.upgrade().map_or(false, |l| !std::ptr::eq(&*l, log)));
            if slot.is_empty() {
                replicas.remove(&log.address);
            }
        }
    }

    /// Offer `entry` to every replica of its address.
    async fn publish(&self, origin: &MemoryLog, entry: &Entry) {
        for replica in self.replicas_of(entry.log()).await {
            if let Err(e) = replica.ingest(entry.clone()).await {
                tracing::warn!(
                    log = %origin.address,
                    peer = %replica.identity(),
                    error = %e,
                    "replica did not take entry"
                );
                origin.emit(LogEvent::Error {
                    message: format!("replica {} unreachable: {e}", replica.identity()),
                });
            }
        }
    }
}

/// Opens replicas on a [`MemoryNetwork`] for one identity.
pub struct MemoryRuntime {
    keypair: Keypair,
    clock: Arc<dyn Clock>,
    network: Arc<MemoryNetwork>,
    /// Replicas opened through this runtime.
    logs: Mutex<HashMap<LogAddress, Arc<MemoryLog>>>,
}

impl MemoryRuntime {
    /// The network this runtime is attached to.
    pub fn network(&self) -> &Arc<MemoryNetwork> {
        &self.network
    }
}

#[async_trait]
impl LogRuntime for MemoryRuntime {
    type Log = MemoryLog;

    fn identity(&self) -> Identity {
        self.keypair.identity()
    }

    async fn open(
        &self,
        manifest: LogManifest,
        controller: Arc<dyn AccessController>,
    ) -> Result<Arc<MemoryLog>> {
        let address = manifest.address();
        let mut logs = self.logs.lock().await;

        if let Some(log) = logs.get(&address) {
            if !log.is_closed() {
                return Ok(Arc::clone(log));
            }
        }

        let (events, _) = broadcast::channel(self.network.event_capacity);
        let log = Arc::new(MemoryLog {
            address,
            manifest,
            keypair: self.keypair.clone(),
            clock: Arc::clone(&self.clock),
            controller,
            network: Arc::clone(&self.network),
            inner: RwLock::new(LogInner::default()),
            events,
            closed: AtomicBool::new(false),
        });

        let existing = self.network.register(&log).await;
        for peer in &existing {
            log.backfill_from(peer).await?;
            peer.emit(LogEvent::Join {
                peer: log.identity(),
            });
            log.emit(LogEvent::Join {
                peer: peer.identity(),
            });
        }

        tracing::debug!(
            log = %address,
            kind = ?log.manifest.kind,
            peers = existing.len(),
            "opened replica"
        );

        logs.insert(address, Arc::clone(&log));
        Ok(log)
    }
}

/// One replica of one log.
pub struct MemoryLog {
    address: LogAddress,
    manifest: LogManifest,
    keypair: Keypair,
    clock: Arc<dyn Clock>,
    controller: Arc<dyn AccessController>,
    network: Arc<MemoryNetwork>,
    inner: RwLock<LogInner>,
    events: broadcast::Sender<LogEvent>,
    closed: AtomicBool,
}

#[derive(Default)]
struct LogInner {
    /// Accepted entries in arrival order.
    history: Vec<Entry>,

    /// Ids of accepted entries.
    seen: HashSet<EntryId>,

    /// Winning entry per key (may be a delete).
    heads: BTreeMap<String, Head>,
}

struct Head {
    id: EntryId,
    entry: Entry,
}

impl Head {
    fn loses_to(&self, timestamp: i64, id: &EntryId) -> bool {
        (self.entry.timestamp(), &self.id) < (timestamp, id)
    }
}

/// Snapshot of a key's live head taken before consulting the controller.
struct PriorHead {
    id: EntryId,
    entry: Entry,
}

enum Commit {
    Applied(LogEvent),
    Duplicate,
    HeadMoved,
}

fn live_head_id(inner: &LogInner, key: &str) -> Option<EntryId> {
    inner
        .heads
        .get(key)
        .filter(|head| !head.entry.is_delete())
        .map(|head| head.id)
}

impl MemoryLog {
    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of entries this replica has accepted.
    pub fn history_len(&self) -> usize {
        self.read().history.len()
    }

    /// Offer an entry to this replica.
    ///
    /// Returns `Ok(true)` if the entry was accepted, `Ok(false)` if it was a
    /// duplicate or the access controller refused it.
    pub async fn ingest(&self, entry: Entry) -> Result<bool> {
        if self.is_closed() {
            return Err(LogError::Closed(self.address));
        }
        if entry.header.log != self.address {
            return Err(LogError::AddressMismatch {
                expected: self.address,
                got: entry.header.log,
            });
        }

        let id = entry.compute_id();
        let mut prior = match self.prior_for(&entry, &id) {
            Some(prior) => prior,
            None => return Ok(false),
        };

        // The controller may suspend, so the head it judged against is
        // re-checked under the write lock and the attempt re-run if it moved.
        let event = loop {
            let attempt = AppendAttempt {
                manifest: &self.manifest,
                entry: &entry,
                prior: prior.as_ref().map(|head| &head.entry),
            };
            if let AccessDecision::Deny(reason) = self.controller.decide(&attempt).await {
                tracing::debug!(
                    log = %self.address,
                    author = %entry.author(),
                    key = entry.key(),
                    %reason,
                    "entry rejected"
                );
                return Ok(false);
            }

            match self.commit(&entry, id, prior.as_ref().map(|head| head.id)) {
                Commit::Applied(event) => break event,
                Commit::Duplicate => return Ok(false),
                Commit::HeadMoved => {
                    tracing::trace!(log = %self.address, key = entry.key(), "head moved, re-checking");
                    prior = match self.prior_for(&entry, &id) {
                        Some(prior) => prior,
                        None => return Ok(false),
                    };
                }
            }
        };

        self.emit(event);
        Ok(true)
    }

    /// Apply an admitted entry, provided the key's live head is still the
    /// one the controller judged against.
    fn commit(&self, entry: &Entry, id: EntryId, judged: Option<EntryId>) -> Commit {
        let mut inner = self.write();
        if inner.seen.contains(&id) {
            return Commit::Duplicate;
        }
        if live_head_id(&inner, entry.key()) != judged {
            return Commit::HeadMoved;
        }

        inner.seen.insert(id);
        let wins = inner
            .heads
            .get(entry.key())
            .map_or(true, |head| head.loses_to(entry.timestamp(), &id));
        if wins {
            inner.heads.insert(
                entry.key().to_string(),
                Head {
                    id,
                    entry: entry.clone(),
                },
            );
        }
        inner.history.push(entry.clone());
        Commit::Applied(LogEvent::Update {
            key: entry.key().to_string(),
            entry_id: id,
            author: *entry.author(),
            op: entry.op(),
        })
    }

    /// The live head `entry` would land on, or `None` if `entry` is a
    /// duplicate.
    fn prior_for(&self, entry: &Entry, id: &EntryId) -> Option<Option<PriorHead>> {
        let inner = self.read();
        if inner.seen.contains(id) {
            return None;
        }
        Some(
            inner
                .heads
                .get(entry.key())
                .filter(|head| !head.entry.is_delete())
                .map(|head| PriorHead {
                    id: head.id,
                    entry: head.entry.clone(),
                }),
        )
    }

    /// Pull every entry held by `peer` through this replica's controller.
    async fn backfill_from(&self, peer: &MemoryLog) -> Result<()> {
        let mut entries = peer.read().history.clone();
        entries.sort_by_key(|e| e.timestamp());
        for entry in entries {
            self.ingest(entry).await?;
        }
        Ok(())
    }

    /// Sign an entry for `key`, timestamped after anything this replica has
    /// seen for it so a local overwrite always wins locally.
    fn build(&self, key: &str) -> EntryBuilder {
        let now = self.clock.now_millis();
        let floor = self
            .read()
            .heads
            .get(key)
            .map_or(i64::MIN, |head| head.entry.timestamp().saturating_add(1));
        EntryBuilder::new(self.keypair.identity(), self.address, key).timestamp(now.max(floor))
    }

    async fn publish(&self, entry: Entry) -> Result<EntryId> {
        if self.is_closed() {
            return Err(LogError::Closed(self.address));
        }
        let id = entry.compute_id();
        self.network.publish(self, &entry).await;
        Ok(id)
    }

    fn emit(&self, event: LogEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn read(&self) -> RwLockReadGuard<'_, LogInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, LogInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ReplicatedLog for MemoryLog {
    fn address(&self) -> LogAddress {
        self.address
    }

    fn manifest(&self) -> &LogManifest {
        &self.manifest
    }

    fn identity(&self) -> Identity {
        self.keypair.identity()
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<EntryId> {
        let entry = self.build(key).value(value).sign(&self.keypair);
        self.publish(entry).await
    }

    async fn delete(&self, key: &str) -> Result<EntryId> {
        let entry = self.build(key).delete().sign(&self.keypair);
        self.publish(entry).await
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.entry(key).await?.map(|entry| entry.value))
    }

    async fn entry(&self, key: &str) -> Result<Option<Entry>> {
        let inner = self.read();
        Ok(inner
            .heads
            .get(key)
            .filter(|head| !head.entry.is_delete())
            .map(|head| head.entry.clone()))
    }

    async fn all(&self) -> Result<Vec<(String, Bytes)>> {
        let inner = self.read();
        Ok(inner
            .heads
            .iter()
            .filter(|(_, head)| !head.entry.is_delete())
            .map(|(key, head)| (key.clone(), head.entry.value.clone()))
            .collect())
    }

    fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.events.subscribe()
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.network.unregister(self).await;
        tracing::debug!(log = %self.address, "closed replica");
        Ok(())
    }
}
