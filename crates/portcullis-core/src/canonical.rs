//! Canonical CBOR encoding for deterministic signing.
//!
//! This module implements RFC 8949 Core Deterministic Encoding for entry
//! headers:
//! - Map keys sorted by encoded byte comparison
//! - Integers use smallest valid encoding
//! - Definite lengths only
//! - No floats (timestamps are i64 milliseconds)
//!
//! Every replica must recompute the exact bytes the author signed, so the
//! encoding is fixed here rather than left to a serde backend.

use ciborium::value::Value;

use crate::entry::{Entry, EntryHeader};

/// Header field keys (integer keys for compact encoding).
///
/// Keys 0-23 encode as single bytes in CBOR.
mod keys {
    pub const VERSION: u64 = 0;
    pub const AUTHOR: u64 = 1;
    pub const LOG: u64 = 2;
    pub const KEY: u64 = 3;
    pub const OP: u64 = 4;
    pub const TIMESTAMP: u64 = 5;
    pub const VALUE_HASH: u64 = 6;
}

/// Encode an entry header to canonical CBOR bytes.
pub fn canonical_header_bytes(header: &EntryHeader) -> Vec<u8> {
    let value = header_to_cbor_value(header);
    let mut buf = Vec::new();
    encode_value_to(&mut buf, &value);
    buf
}

/// Encode an entire entry to canonical bytes.
///
/// Format: canonical_header || value || signature
pub fn canonical_bytes(entry: &Entry) -> Vec<u8> {
    let mut buf = canonical_header_bytes(&entry.header);
    buf.extend_from_slice(&entry.value);
    buf.extend_from_slice(&entry.signature.0);
    buf
}

/// Construct the signed message (header || value).
pub fn signed_message(entry: &Entry) -> Vec<u8> {
    let mut buf = canonical_header_bytes(&entry.header);
    buf.extend_from_slice(&entry.value);
    buf
}

fn header_to_cbor_value(header: &EntryHeader) -> Value {
    let entries = vec![
        (
            Value::Integer(keys::VERSION.into()),
            Value::Integer(header.version.into()),
        ),
        (
            Value::Integer(keys::AUTHOR.into()),
            Value::Bytes(header.author.0.to_vec()),
        ),
        (
            Value::Integer(keys::LOG.into()),
            Value::Bytes(header.log.0.to_vec()),
        ),
        (
            Value::Integer(keys::KEY.into()),
            Value::Text(header.key.clone()),
        ),
        (
            Value::Integer(keys::OP.into()),
            Value::Integer(header.op.to_u8().into()),
        ),
        (
            Value::Integer(keys::TIMESTAMP.into()),
            Value::Integer(header.timestamp.into()),
        ),
        (
            Value::Integer(keys::VALUE_HASH.into()),
            Value::Bytes(header.value_hash.0.to_vec()),
        ),
    ];

    Value::Map(entries)
}

/// Recursively encode a CBOR value.
///
/// Only the value types produced by `header_to_cbor_value` are supported.
fn encode_value_to(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Integer(i) => encode_integer(buf, *i),
        Value::Bytes(b) => encode_bytes(buf, b),
        Value::Text(s) => encode_text(buf, s),
        Value::Map(entries) => encode_map_canonical(buf, entries),
        other => unreachable!("canonical header never contains {other:?}"),
    }
}

/// Encode a CBOR integer (major types 0 and 1).
fn encode_integer(buf: &mut Vec<u8>, i: ciborium::value::Integer) {
    let n: i128 = i.into();

    if n >= 0 {
        encode_uint(buf, 0, n as u64);
    } else {
        // CBOR encodes -1 as 0, -2 as 1, etc.
        let abs = (-1 - n) as u64;
        encode_uint(buf, 1, abs);
    }
}

/// Encode an unsigned integer with the given major type.
fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

fn encode_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    encode_uint(buf, 2, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

fn encode_text(buf: &mut Vec<u8>, s: &str) {
    encode_uint(buf, 3, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

/// Encode a map canonically (major type 5).
///
/// Keys are sorted by their encoded byte comparison.
fn encode_map_canonical(buf: &mut Vec<u8>, entries: &[(Value, Value)]) {
    let mut pairs: Vec<(Vec<u8>, &Value)> = entries
        .iter()
        .map(|(k, v)| {
            let mut key_buf = Vec::new();
            encode_value_to(&mut key_buf, k);
            (key_buf, v)
        })
        .collect();

    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    encode_uint(buf, 5, pairs.len() as u64);
    for (key_bytes, value) in pairs {
        buf.extend_from_slice(&key_bytes);
        encode_value_to(buf, value);
    }
}
