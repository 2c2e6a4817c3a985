//! Stable hashing for run keys.

use anaphase_core::errors::{AnaphaseError, ErrorInfo};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Serializes a payload to canonical JSON bytes: object keys sorted, no
/// whitespace. Stable across processes for identical payloads.
pub fn to_canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, AnaphaseError> {
    // serde_json::Value keeps object keys in sorted order, so a round trip
    // through Value normalizes key order before encoding.
    let normalized = serde_json::to_value(value)
        .map_err(|err| AnaphaseError::Execution(ErrorInfo::new("hash.encode", err.to_string())))?;
    serde_json::to_vec(&normalized)
        .map_err(|err| AnaphaseError::Execution(ErrorInfo::new("hash.encode", err.to_string())))
}

/// Computes a stable hexadecimal hash for the provided serializable payload.
pub fn stable_hash_string<T: Serialize>(value: &T) -> Result<String, AnaphaseError> {
    let bytes = to_canonical_json_bytes(value)?;
    let digest = Sha256::digest(bytes);
    Ok(hex::encode(digest))
}
