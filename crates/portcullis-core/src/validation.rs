//! Entry validation: signature verification and structural checks.

use crate::address::LogAddress;
use crate::canonical::signed_message;
use crate::crypto::Blake3Hash;
use crate::entry::{Entry, EntryOp, ENTRY_VERSION, MAX_KEY_LEN};
use crate::error::ValidationError;

/// Validate an entry's structure and signature.
///
/// This performs:
/// - Version check
/// - Key bounds
/// - Value hash verification
/// - Delete entries carry no value
/// - Signature verification against the author identity
pub fn validate_entry(entry: &Entry) -> Result<(), ValidationError> {
    if entry.header.version != ENTRY_VERSION {
        return Err(ValidationError::UnsupportedVersion(entry.header.version));
    }

    if entry.header.key.is_empty() || entry.header.key.len() > MAX_KEY_LEN {
        return Err(ValidationError::InvalidKey { max: MAX_KEY_LEN });
    }

    let computed_hash = Blake3Hash::hash(&entry.value);
    if computed_hash != entry.header.value_hash {
        return Err(ValidationError::ValueHashMismatch);
    }

    if entry.header.op == EntryOp::Delete && !entry.value.is_empty() {
        return Err(ValidationError::DeleteWithValue);
    }

    let message = signed_message(entry);
    entry
        .header
        .author
        .verify(&message, &entry.signature)
        .map_err(|_| ValidationError::SignatureFailed)?;

    Ok(())
}

/// Validate an entry and check that it targets `address`.
pub fn validate_entry_for(entry: &Entry, address: &LogAddress) -> Result<(), ValidationError> {
    if entry.header.log != *address {
        return Err(ValidationError::WrongLog {
            expected: *address,
            got: entry.header.log,
        });
    }
    validate_entry(entry)
}
