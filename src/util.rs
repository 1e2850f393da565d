//! Shared utility functions

use sha2::{Digest, Sha256};

/// Truncate a string to at most `max_bytes` without splitting a character
///
/// Walks back from `max_bytes` to the nearest char boundary. Strings that
/// already fit are returned unchanged.
pub fn truncate_utf8_safe(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// SHA-256 of `bytes`, first 16 bytes as lowercase hex (32 chars)
pub fn short_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let result = hasher.finalize();
    result[..16].iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_shorter_than_max() {
        assert_eq!(truncate_utf8_safe("hello", 10), "hello");
    }

    #[test]
    fn test_truncate_at_utf8_boundary() {
        // Each character is 3 bytes
        let s = "日本語";
        assert_eq!(truncate_utf8_safe(s, 4), "日");
        assert_eq!(truncate_utf8_safe(s, 6), "日本");
        assert_eq!(truncate_utf8_safe(s, 0), "");
    }

    #[test]
    fn test_short_hash_is_stable() {
        let a = short_hash(b"conversation");
        assert_eq!(a.len(), 32);
        assert_eq!(a, short_hash(b"conversation"));
        assert_ne!(a, short_hash(b"conversation2"));
    }
}
