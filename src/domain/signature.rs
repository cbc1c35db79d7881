//! Stream-URL signing. A short MD5 prefix over the file's identifying
//! tuple acts as a bearer capability: whoever holds the URL may stream.

use crate::domain::FileDescriptor;

/// Default number of hex characters in a stream-URL hash.
pub const DEFAULT_HASH_LENGTH: usize = 8;

/// Deterministic short hash over `name|size|mime|id`, truncated to `len`
/// hex characters. `len` is clamped to the 32 chars an MD5 digest yields.
pub fn short_hash(name: &str, size: i64, mime: &str, id: i64, len: usize) -> String {
    let digest = md5::compute(format!("{}|{}|{}|{}", name, size, mime, id));
    let mut full = hex::encode(digest.0);
    full.truncate(len.clamp(1, 32));
    full
}

/// Hash for a whole descriptor.
pub fn descriptor_hash(fd: &FileDescriptor, len: usize) -> String {
    short_hash(&fd.name, fd.size, &fd.mime, fd.id, len)
}

/// Constant-time equality over the presented hash and the expected one.
/// Folds the XOR of every byte so timing does not leak the prefix length
/// at which the comparison diverges.
pub fn verify_hash(presented: &str, expected: &str) -> bool {
    if presented.len() != expected.len() {
        return false;
    }
    presented
        .bytes()
        .zip(expected.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic_and_truncated() {
        let a = short_hash("video.mp4", 2_500_000, "video/mp4", 42, 8);
        let b = short_hash("video.mp4", 2_500_000, "video/mp4", 42, 8);
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hash_depends_on_every_field() {
        let base = short_hash("a.mp4", 100, "video/mp4", 1, 8);
        assert_ne!(base, short_hash("b.mp4", 100, "video/mp4", 1, 8));
        assert_ne!(base, short_hash("a.mp4", 101, "video/mp4", 1, 8));
        assert_ne!(base, short_hash("a.mp4", 100, "audio/mpeg", 1, 8));
        assert_ne!(base, short_hash("a.mp4", 100, "video/mp4", 2, 8));
    }

    #[test]
    fn configurable_length() {
        assert_eq!(short_hash("a", 1, "m", 1, 16).len(), 16);
        assert_eq!(short_hash("a", 1, "m", 1, 99).len(), 32);
        assert_eq!(short_hash("a", 1, "m", 1, 0).len(), 1);
    }

    #[test]
    fn verify_rejects_near_misses() {
        let h = short_hash("a.mp4", 100, "video/mp4", 1, 8);
        assert!(verify_hash(&h, &h));

        let mut off = h.clone().into_bytes();
        off[7] = if off[7] == b'0' { b'1' } else { b'0' };
        assert!(!verify_hash(std::str::from_utf8(&off).unwrap(), &h));
        assert!(!verify_hash(&h[..7], &h));
        assert!(!verify_hash("", &h));
    }
}
