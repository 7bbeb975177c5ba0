use sha2::{Sha256, Digest};

/// A SHA-256 output.
pub type Hash32 = [u8; 32];

/// Computes the SHA-256 digest of the given data and returns it as a hex string.
pub fn digest(data: &[u8]) -> String {
    hex::encode(hash_bytes(data))
}

/// Computes the raw SHA-256 digest of the given data.
pub fn hash_bytes(data: &[u8]) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hashes several byte slices as one continuous message.
pub fn hash_parts(parts: &[&[u8]]) -> Hash32 {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}
