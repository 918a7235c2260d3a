//! # Portcullis Log
//!
//! The boundary to the replicated, append-only keyed log that Portcullis
//! protects. The log engine itself is an external collaborator; this crate
//! defines what the permission layer needs from it and ships an in-process
//! implementation for tests and demos.
//!
//! ## Key Types
//!
//! - [`ReplicatedLog`] - A handle to one replica of one log
//! - [`LogRuntime`] - Opens replicas for a local identity
//! - [`AccessController`] - The hook consulted before any entry is applied
//! - [`LogEvent`] - Typed change notifications
//! - [`MemoryNetwork`] - In-process network of replicas
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use portcullis_core::{Keypair, LogManifest, SystemClock};
//! use portcullis_log::{MemoryNetwork, LogRuntime, OwnerOnly, ReplicatedLog};
//!
//! async fn example() {
//!     let network = MemoryNetwork::new();
//!     let keypair = Keypair::generate();
//!     let runtime = network.runtime(keypair.clone(), Arc::new(SystemClock));
//!
//!     let manifest = LogManifest::data(keypair.identity(), "notes");
//!     let log = runtime.open(manifest, Arc::new(OwnerOnly)).await.unwrap();
//!     log.set("k", b"v".to_vec().into()).await.unwrap();
//! }
//! ```
//!
//! ## Replication Model
//!
//! - **Every replica decides**: an entry is offered to every replica of its
//!   address, and each runs its own controller. A rejected entry is dropped
//!   silently and never materializes at that replica.
//! - **Last writer wins**: per key, by `(timestamp, entry_id)`.
//! - **Backfill**: a newly opened replica pulls history from existing ones,
//!   re-checking every entry with its own controller.

pub mod access;
pub mod error;
pub mod memory;
pub mod traits;

pub use access::{OpenAccess, OwnerOnly};
pub use error::{LogError, Result};
pub use memory::{MemoryLog, MemoryNetwork, MemoryRuntime};
pub use traits::{
    AccessController, AccessDecision, AppendAttempt, DenyReason, LogEvent, LogRuntime,
    ReplicatedLog,
};
