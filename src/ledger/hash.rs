//! Block hashing

use sha2::{Digest, Sha256};

/// `previous_hash` recorded on the genesis block
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// H(index, timestamp, payload, previous_hash, department).
///
/// The inputs are concatenated without separators in that order and hashed
/// with SHA-256. `payload` must be the exact serialized text that is stored.
pub fn block_hash(
    index: i64,
    timestamp: &str,
    payload: &str,
    previous_hash: &str,
    department: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(index.to_string().as_bytes());
    hasher.update(timestamp.as_bytes());
    hasher.update(payload.as_bytes());
    hasher.update(previous_hash.as_bytes());
    hasher.update(department.as_bytes());
    hex::encode(hasher.finalize())
}
