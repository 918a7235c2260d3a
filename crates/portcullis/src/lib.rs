//! # Portcullis
//!
//! Capability-based write access control for peer-replicated logs.
//!
//! ## Overview
//!
//! Every participant owns personal replicated logs and grants other
//! participants temporary write access, with no central authority:
//!
//! - **Owned logs**: the owner identity is fixed when a log is created and is
//!   always allowed to write
//! - **Mailboxes**: every identity has a publicly appendable log for
//!   permission requests; only its owner acts on them
//! - **Grants**: time-bounded, held only in the owner's in-memory registry,
//!   judged against the owner's own clock
//! - **Gates**: every replica checks every entry before applying it; a
//!   refused write never appears
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use portcullis::{Node, NodeConfig};
//! use portcullis::core::{Keypair, SystemClock};
//! use portcullis::log::{MemoryNetwork, ReplicatedLog};
//!
//! async fn example() {
//!     let network = MemoryNetwork::new();
//!     let clock = Arc::new(SystemClock);
//!
//!     let owner = Node::new(
//!         network.runtime(Keypair::generate(), clock.clone()),
//!         clock.clone(),
//!         NodeConfig::default(),
//!     );
//!     let peer = Node::new(
//!         network.runtime(Keypair::generate(), clock.clone()),
//!         clock.clone(),
//!         NodeConfig::default(),
//!     );
//!     owner.start().await.unwrap();
//!     peer.start().await.unwrap();
//!
//!     let log = owner.create_log("notes").await.unwrap();
//!     let request = peer
//!         .request(log.address(), owner.identity(), "let me edit")
//!         .await
//!         .unwrap();
//!     owner.grant(request.id, None).await.unwrap();
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `portcullis::core` - Identities, manifests, entries, clocks
//! - `portcullis::log` - The replicated log boundary and in-memory runtime
//! - `portcullis::perms` - Grants, gates, mailboxes and the coordinator

pub mod error;
pub mod node;

// Re-export component crates
pub use portcullis_core as core;
pub use portcullis_log as log;
pub use portcullis_perms as perms;

// Re-export main types for convenience
pub use error::{NodeError, Result};
pub use node::{Node, NodeConfig};

// Re-export commonly used types
pub use portcullis_core::{Clock, Identity, Keypair, LogAddress, LogKind, LogManifest};
pub use portcullis_log::{LogEvent, LogRuntime, ReplicatedLog};
pub use portcullis_perms::{
    CoordinatorConfig, CoordinatorEvent, Grant, Outcome, PermissionRequest, RequestId,
    RequestStatus,
};
