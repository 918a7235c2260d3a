//! # Portcullis Core
//!
//! Pure primitives for Portcullis: identities, log manifests, signed entries
//! and canonicalization.
//!
//! This crate contains no I/O, no storage, no networking. It is pure computation
//! over cryptographic data structures.
//!
//! ## Key Types
//!
//! - [`Identity`] - The single canonical principal (an Ed25519 public key)
//! - [`LogManifest`] - Owner, name and type tag of a log, fixed at creation
//! - [`LogAddress`] - Content-derived identifier of a log
//! - [`Entry`] - A signed put/delete against one key of one log
//! - [`Clock`] - Source of "now" for every expiry comparison
//!
//! ## Canonicalization
//!
//! Entry headers are encoded using deterministic CBOR. See [`canonical`] module.

pub mod address;
pub mod canonical;
pub mod crypto;
pub mod entry;
pub mod error;
pub mod time;
pub mod types;
pub mod validation;

pub use address::{LogAddress, LogKind, LogManifest, MAILBOX_LOG_NAME};
pub use canonical::{canonical_bytes, canonical_header_bytes, signed_message};
pub use crypto::{Blake3Hash, Identity, Keypair, Signature};
pub use entry::{Entry, EntryBuilder, EntryHeader, EntryOp, ENTRY_VERSION, MAX_KEY_LEN};
pub use error::{CoreError, ValidationError};
pub use time::{duration_millis, Clock, ManualClock, SystemClock};
pub use types::EntryId;
pub use validation::{validate_entry, validate_entry_for};
