use sha2::{Digest, Sha256};

/// SHA-256 of an uploaded statement, used as the content hash on its record.
pub fn sha256_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Lowercase hex digest of `data` (64 chars).
pub fn content_hash(data: &[u8]) -> String {
    hex::encode(sha256_bytes(data))
}
