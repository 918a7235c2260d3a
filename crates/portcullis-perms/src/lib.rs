//! # Portcullis Permissions
//!
//! Time-bounded write grants for replicated logs, and the request/decision
//! protocol that produces them.
//!
//! ## Overview
//!
//! Each peer owns its data logs and is always allowed to write them. Other
//! peers ask for access by appending a request to the owner's mailbox; the
//! owner's coordinator decides, and a grant lands in the owner's registry.
//! The owner's [`AccessGate`] consults that registry before any entry is
//! applied to the owner's replica.
//!
//! ## Key Types
//!
//! - [`GrantRegistry`] - The in-memory table of live grants
//! - [`AccessGate`] - Access controller for protected data logs
//! - [`MailboxGate`] / [`RequestMailbox`] - The publicly appendable request log
//! - [`PermissionRequest`] - A request record and its decision
//! - [`PermissionCoordinator`] - Request, decide, revoke, sweep
//! - [`DecisionPolicy`] - Automated decisions
//!
//! ## Trust Model
//!
//! - **No shared clock**: every expiry is judged by the local clock of the
//!   peer doing the judging.
//! - **Grants never travel**: a grant exists only in the registry of the
//!   peer that installed it. Requesters mirror their own granted records so
//!   their own replica reflects their own writes.
//! - **Fail closed**: unverifiable authors are denied whatever the registry
//!   says.
//! - **Silent denial**: a refused entry simply never appears.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod gate;
pub mod grant;
pub mod mailbox;
pub mod policy;
pub mod registry;
pub mod request;
pub mod state;
pub mod verifier;

pub use config::CoordinatorConfig;
pub use coordinator::{CoordinatorEvent, PermissionCoordinator};
pub use error::{PermsError, Result};
pub use gate::AccessGate;
pub use grant::{Grant, GrantKey};
pub use mailbox::{MailboxGate, RequestMailbox};
pub use policy::{AutoGrant, DecisionPolicy, Manual, PolicyDecision};
pub use registry::GrantRegistry;
pub use request::{Outcome, PermissionRequest, RequestId, RequestStatus};
pub use state::{transition, InvalidTransition, RequestEvent, RequestState};
pub use verifier::{DenyListVerifier, IdentityVerifier, KeyVerifier};
