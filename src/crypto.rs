//! Hashing utilities for the built-in work function

use blake2::{Blake2s256, Digest};

/// Reusable Blake2s hasher
pub struct Blake2sHasher {
    hasher: Blake2s256,
}

impl Blake2sHasher {
    /// Create a new Blake2s hasher
    pub fn new() -> Self {
        Self {
            hasher: Blake2s256::new(),
        }
    }

    /// Hash data and return the digest
    pub fn hash(&mut self, data: &[u8]) -> [u8; 32] {
        self.hasher.update(data);
        self.hasher.finalize_reset().into()
    }

    /// Hash `prefix` followed by the decimal nonce
    pub fn hash_with_nonce(&mut self, prefix: &[u8], nonce: u64) -> [u8; 32] {
        self.hasher.update(prefix);
        self.hasher.update(nonce.to_string().as_bytes());
        self.hasher.finalize_reset().into()
    }
}

impl Default for Blake2sHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Hex digest of `data`
pub fn blake2s_hex(data: &[u8]) -> String {
    hex::encode(Blake2sHasher::new().hash(data))
}
