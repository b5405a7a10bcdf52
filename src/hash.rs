//! C1: deterministic content hashing for change detection.
//!
//! The grounding engine already carries `sha2` for key-cache identity; we reuse the same
//! dependency here instead of hand-rolling a checksum, per SPEC_FULL.md §4.1.

use sha2::{Digest, Sha256};

/// Hex digest of raw playlist bytes. Byte-identical input always yields the same digest,
/// which is what the differ (C5) uses to skip unchanged refetches.
pub fn digest(raw: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_bytes_same_digest() {
        let a = digest(b"#EXTM3U\n#EXT-X-VERSION:3\n");
        let b = digest(b"#EXTM3U\n#EXT-X-VERSION:3\n");
        assert_eq!(a, b);
    }

    #[test]
    fn different_bytes_different_digest() {
        let a = digest(b"one");
        let b = digest(b"two");
        assert_ne!(a, b);
    }

    #[test]
    fn digest_is_non_empty_hex() {
        let d = digest(b"x");
        assert!(!d.is_empty());
        assert!(d.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
