//! Content hashing for stable identifiers and fingerprints.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Compute SHA256 hash of a serializable value.
///
/// The value is serialized to JSON before hashing, ensuring deterministic output
/// as long as the value has no unordered maps. Returns 64 lowercase hex chars.
pub fn compute_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(value)?;
    Ok(hash_str(&json))
}

/// SHA256 of a string as lowercase hex.
pub fn hash_str(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// First 16 hex chars of the SHA256 of `s`.
pub fn short_hash(s: &str) -> String {
    let mut h = hash_str(s);
    h.truncate(16);
    h
}
