//! Entry: one signed write against one key of one log.
//!
//! Entries are immutable. A later entry for the same key supersedes an
//! earlier one; a `Delete` entry is a tombstone for the key.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::address::LogAddress;
use crate::canonical::{canonical_bytes, canonical_header_bytes};
use crate::crypto::{Blake3Hash, Identity, Keypair, Signature};
use crate::types::EntryId;

/// The current entry schema version.
pub const ENTRY_VERSION: u8 = 0;

/// Maximum key length in bytes.
pub const MAX_KEY_LEN: usize = 256;

/// The operation an entry performs on its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EntryOp {
    /// Set the key to the entry's value.
    Put = 0x01,
    /// Remove the key.
    Delete = 0x02,
}

impl EntryOp {
    /// Convert to u8 for serialization.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Try to parse from u8.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Put),
            0x02 => Some(Self::Delete),
            _ => None,
        }
    }
}

/// The header of an entry, containing all signed metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryHeader {
    /// Schema version (currently 0).
    pub version: u8,

    /// The author's identity.
    pub author: Identity,

    /// The log this entry targets.
    pub log: LogAddress,

    /// The key being written.
    pub key: String,

    /// Put or delete.
    pub op: EntryOp,

    /// Author-claimed timestamp (Unix milliseconds). Used for
    /// last-writer-wins ordering only, never for authorization.
    pub timestamp: i64,

    /// Blake3 hash of the value bytes.
    pub value_hash: Blake3Hash,
}

/// A complete entry: header + value + signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// The entry header.
    pub header: EntryHeader,

    /// The value bytes (empty for deletes).
    pub value: Bytes,

    /// Ed25519 signature over (canonical_header || value).
    pub signature: Signature,
}

impl Entry {
    /// Compute the entry ID (Blake3 hash of canonical bytes).
    pub fn compute_id(&self) -> EntryId {
        let bytes = canonical_bytes(self);
        EntryId(Blake3Hash::hash(&bytes).0)
    }

    /// Get the author's identity.
    pub fn author(&self) -> &Identity {
        &self.header.author
    }

    /// Get the target log address.
    pub fn log(&self) -> &LogAddress {
        &self.header.log
    }

    /// Get the key.
    pub fn key(&self) -> &str {
        &self.header.key
    }

    /// Get the operation.
    pub fn op(&self) -> EntryOp {
        self.header.op
    }

    /// Get the author-claimed timestamp.
    pub fn timestamp(&self) -> i64 {
        self.header.timestamp
    }

    /// Check if this entry deletes its key.
    pub fn is_delete(&self) -> bool {
        self.header.op == EntryOp::Delete
    }
}

/// Builder for creating entries.
pub struct EntryBuilder {
    author: Identity,
    log: LogAddress,
    key: String,
    op: EntryOp,
    timestamp: i64,
    value: Bytes,
}

impl EntryBuilder {
    /// Start building a put entry.
    pub fn new(author: Identity, log: LogAddress, key: impl Into<String>) -> Self {
        Self {
            author,
            log,
            key: key.into(),
            op: EntryOp::Put,
            timestamp: 0,
            value: Bytes::new(),
        }
    }

    /// Set the timestamp.
    pub fn timestamp(mut self, ts: i64) -> Self {
        self.timestamp = ts;
        self
    }

    /// Turn this entry into a delete. Clears any value.
    pub fn delete(mut self) -> Self {
        self.op = EntryOp::Delete;
        self.value = Bytes::new();
        self
    }

    /// Set the value.
    pub fn value(mut self, v: impl Into<Bytes>) -> Self {
        self.value = v.into();
        self
    }

    /// Build and sign the entry.
    pub fn sign(self, keypair: &Keypair) -> Entry {
        let value_hash = Blake3Hash::hash(&self.value);

        let header = EntryHeader {
            version: ENTRY_VERSION,
            author: self.author,
            log: self.log,
            key: self.key,
            op: self.op,
            timestamp: self.timestamp,
            value_hash,
        };

        // Sign: canonical_header || value
        let mut message = canonical_header_bytes(&header);
        message.extend_from_slice(&self.value);
        let signature = keypair.sign(&message);

        Entry {
            header,
            value: self.value,
            signature,
        }
    }
}
