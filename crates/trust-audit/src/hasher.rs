// hasher.rs - SHA-256 helpers for the ledger chain.
//
// All hashes are SHA-256, lowercase hex (64 chars).

use sha2::{Digest, Sha256};

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Hash a UTF-8 string.
pub fn hash_str(s: &str) -> String {
    hash_bytes(s.as_bytes())
}
