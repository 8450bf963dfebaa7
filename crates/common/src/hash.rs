//! Hash computation utilities.
//!
//! The service verifies every upload against a hex-encoded SHA-1, so all
//! chunk buffers hash their contents as bytes stream through them.

use sha1::{Digest, Sha1};

/// Compute the SHA-1 hash of a byte slice.
///
/// # Arguments
/// * `data` - Bytes to hash
///
/// # Returns
/// 40-character lowercase hex string.
pub fn hash_bytes(data: &[u8]) -> String {
    hex::encode(Sha1::digest(data))
}

/// Streaming hasher for incremental SHA-1 hashing.
///
/// Use this when you need to hash data incrementally, such as when
/// computing a checksum while buffering or uploading a chunk.
#[derive(Clone)]
pub struct Sha1Hasher {
    inner: Sha1,
}

impl Sha1Hasher {
    /// Create a new streaming hasher.
    pub fn new() -> Self {
        Self { inner: Sha1::new() }
    }

    /// Update the hasher with additional data.
    ///
    /// # Arguments
    /// * `data` - Bytes to add to the hash computation
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Return the hash of everything written so far as a 40-char hex string.
    ///
    /// Does not consume the hasher; further `update` calls continue from the
    /// same state.
    pub fn finish_hex(&self) -> String {
        hex::encode(self.inner.clone().finalize())
    }

    /// Discard all state and start hashing from scratch.
    pub fn reset(&mut self) {
        self.inner = Sha1::new();
    }
}

impl Default for Sha1Hasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_bytes_empty() {
        assert_eq!(hash_bytes(b""), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }

    #[test]
    fn test_hash_bytes_known_value() {
        assert_eq!(
            hash_bytes(b"hello"),
            "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"
        );
    }

    #[test]
    fn test_sha1_hasher_incremental() {
        let mut hasher: Sha1Hasher = Sha1Hasher::new();
        hasher.update(b"hello ");
        hasher.update(b"world");
        let incremental: String = hasher.finish_hex();

        let direct: String = hash_bytes(b"hello world");
        assert_eq!(incremental, direct);
    }

    #[test]
    fn test_finish_hex_does_not_consume() {
        let mut hasher: Sha1Hasher = Sha1Hasher::new();
        hasher.update(b"he");
        let partial: String = hasher.finish_hex();
        assert_eq!(partial, hash_bytes(b"he"));

        hasher.update(b"llo");
        assert_eq!(hasher.finish_hex(), hash_bytes(b"hello"));
    }

    #[test]
    fn test_reset() {
        let mut hasher: Sha1Hasher = Sha1Hasher::new();
        hasher.update(b"garbage");
        hasher.reset();
        hasher.update(b"hello");
        assert_eq!(hasher.finish_hex(), hash_bytes(b"hello"));
    }
}
