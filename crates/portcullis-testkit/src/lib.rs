//! # Portcullis Testkit
//!
//! Shared setup for Portcullis tests: an in-process network of started
//! nodes on one [`ManualClock`](portcullis_core::ManualClock), helpers for
//! awaiting coordinator notifications, and proptest strategies for
//! identities, manifests and request records.
//!
//! A two-peer setup:
//!
//! ```rust,no_run
//! use portcullis::ReplicatedLog;
//! use portcullis_testkit::TestNetwork;
//!
//! async fn two_peers() {
//!     let net = TestNetwork::new();
//!     let (owner, requester) = (net.peer(1).await, net.peer(2).await);
//!     let log = owner.node.create_log("notes").await.unwrap();
//!     let record = requester
//!         .node
//!         .request(log.address(), owner.identity(), "please")
//!         .await
//!         .unwrap();
//!     owner.node.grant(record.id, None).await.unwrap();
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{init_tracing, multi_peer_fixtures, wait_for_event, TestNetwork, TestPeer};
