//! Content-addressed hashing for script sources.
//!
//! Cache entries and the per-call import tracker identify script text by its
//! SHA-256 digest: byte-identical sources hash equal, a single changed byte
//! hashes different.

use sha2::{Digest, Sha256};
use std::fmt;

/// A SHA-256 digest of script source text.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Hash a script source.
    #[must_use]
    pub fn from_source(source: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        Self(hasher.finalize().into())
    }

    /// Whether `source` hashes to this digest.
    #[must_use]
    pub fn verify(&self, source: &str) -> bool {
        Self::from_source(source) == *self
    }

    /// Hex-encoded digest.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form; the full digest is noise in logs.
        write!(f, "ContentHash({}..)", &self.to_hex()[..12])
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_sources_hash_equal() {
        let a = ContentHash::from_source("export const io = {};");
        let b = ContentHash::from_source("export const io = {};");
        assert_eq!(a, b);
    }

    #[test]
    fn test_single_byte_change_hashes_different() {
        let a = ContentHash::from_source("const x = 1;");
        let b = ContentHash::from_source("const x = 2;");
        assert_ne!(a, b);
    }

    #[test]
    fn test_verify() {
        let hash = ContentHash::from_source("hello");
        assert!(hash.verify("hello"));
        assert!(!hash.verify("hellO"));
    }

    #[test]
    fn test_display_is_prefixed_hex() {
        let hash = ContentHash::from_source("hello");
        let s = hash.to_string();
        assert!(s.starts_with("sha256:"));
        assert_eq!(s.len(), "sha256:".len() + 64);
    }
}
