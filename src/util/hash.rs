//! Hashing utilities for cache keys.

use sha2::{Digest, Sha256};

/// Compute SHA256 hash of a byte slice.
pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute SHA256 hash of a string.
pub fn sha256_str(s: &str) -> String {
    sha256_bytes(s.as_bytes())
}

/// First `len` hex characters of the SHA256 of `s`.
pub fn short_hash(s: &str, len: usize) -> String {
    let mut full = sha256_str(s);
    full.truncate(len);
    full
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_str() {
        assert_eq!(
            sha256_str("hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_short_hash_is_prefix() {
        let short = short_hash("console", 12);
        assert_eq!(short.len(), 12);
        assert!(sha256_str("console").starts_with(&short));
    }
}
