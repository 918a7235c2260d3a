//! Log addresses and manifests.
//!
//! A log is identified by its manifest: the owner identity, a name, and an
//! explicit type tag. All three are fixed when the log is created and the
//! address is derived from them, so a replica can never be reclassified after
//! the fact.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::Identity;

/// Well-known name of every identity's permission-request mailbox.
pub const MAILBOX_LOG_NAME: &str = "permission-requests";

/// A 32-byte log address.
///
/// Derived from Blake3(domain || owner || kind || name).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogAddress(pub [u8; 32]);

impl LogAddress {
    /// Derive a log address from its manifest fields.
    pub fn derive(owner: &Identity, kind: LogKind, name: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"portcullis-log-v0:");
        hasher.update(&owner.0);
        hasher.update(&[kind.to_u8()]);
        hasher.update(b":");
        hasher.update(name.as_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for LogAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogAddress({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for LogAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

impl AsRef<[u8]> for LogAddress {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// The type tag of a log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum LogKind {
    /// An ordinary keyed data log protected by the access gate.
    Data = 0x00,
    /// A publicly appendable permission-request mailbox.
    Mailbox = 0x01,
}

impl LogKind {
    /// Convert to u8 for hashing and encoding.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Try to parse from u8.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Data),
            0x01 => Some(Self::Mailbox),
            _ => None,
        }
    }
}

/// Creation-time description of a log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogManifest {
    /// The identity that owns the log. Always authorized to write.
    pub owner: Identity,
    /// Human-readable name, unique per owner and kind.
    pub name: String,
    /// Explicit type tag.
    pub kind: LogKind,
}

impl LogManifest {
    /// Manifest for a protected data log.
    pub fn data(owner: Identity, name: impl Into<String>) -> Self {
        Self {
            owner,
            name: name.into(),
            kind: LogKind::Data,
        }
    }

    /// The well-known mailbox manifest of `owner`.
    pub fn mailbox(owner: Identity) -> Self {
        Self {
            owner,
            name: MAILBOX_LOG_NAME.to_string(),
            kind: LogKind::Mailbox,
        }
    }

    /// The content-derived address of this log.
    pub fn address(&self) -> LogAddress {
        LogAddress::derive(&self.owner, self.kind, &self.name)
    }

    /// Whether this is a mailbox log.
    pub fn is_mailbox(&self) -> bool {
        self.kind == LogKind::Mailbox
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;

    #[test]
    fn test_address_is_deterministic() {
        let owner = Keypair::from_seed(&[1; 32]).identity();
        let a = LogManifest::data(owner, "notes").address();
        let b = LogManifest::data(owner, "notes").address();
        assert_eq!(a, b);
    }

    #[test]
    fn test_kind_separates_addresses() {
        let owner = Keypair::from_seed(&[1; 32]).identity();
        let data = LogManifest::data(owner, MAILBOX_LOG_NAME).address();
        let mailbox = LogManifest::mailbox(owner).address();
        assert_ne!(data, mailbox);
    }

    #[test]
    fn test_owner_separates_addresses() {
        let a = Keypair::from_seed(&[1; 32]).identity();
        let b = Keypair::from_seed(&[2; 32]).identity();
        assert_ne!(
            LogManifest::mailbox(a).address(),
            LogManifest::mailbox(b).address()
        );
    }

    #[test]
    fn test_log_kind_roundtrip() {
        for kind in [LogKind::Data, LogKind::Mailbox] {
            assert_eq!(LogKind::from_u8(kind.to_u8()), Some(kind));
        }
        assert_eq!(LogKind::from_u8(7), None);
    }
}
