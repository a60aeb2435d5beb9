//! Identity fingerprints for out-of-band verification.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Compute the SHA-256 fingerprint of a serialized public key.
///
/// Lowercase hex, split into groups of `group_size` characters separated by
/// single spaces, for comparison out of band.
pub fn fingerprint(public_key: &[u8], group_size: usize) -> String {
    let digest = hex::encode(Sha256::digest(public_key));
    digest
        .as_bytes()
        .chunks(group_size.max(1))
        .map(|chunk| std::str::from_utf8(chunk).unwrap_or(""))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Compare two fingerprints in constant time, ignoring whitespace and case.
pub fn fingerprints_match(a: &str, b: &str) -> bool {
    let normalize = |s: &str| -> Vec<u8> {
        s.bytes()
            .filter(|b| !b.is_ascii_whitespace())
            .map(|b| b.to_ascii_lowercase())
            .collect()
    };
    bool::from(normalize(a).ct_eq(&normalize(b)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digest() {
        // SHA-256("abc")
        let fp = fingerprint(b"abc", 4);
        assert!(fp.starts_with("ba78 16bf 8f01 cfea"));
        assert_eq!(fp.split(' ').count(), 16);
        assert!(fp.split(' ').all(|g| g.len() == 4));
    }

    #[test]
    fn deterministic_and_distinct() {
        assert_eq!(fingerprint(b"key-a", 4), fingerprint(b"key-a", 4));
        assert_ne!(fingerprint(b"key-a", 4), fingerprint(b"key-b", 4));
    }

    #[test]
    fn group_size_is_configurable() {
        let fp = fingerprint(b"abc", 8);
        assert_eq!(fp.split(' ').count(), 8);
        // zero is treated as one
        assert_eq!(fingerprint(b"abc", 0).split(' ').count(), 64);
    }

    #[test]
    fn match_ignores_spacing_and_case() {
        let fp = fingerprint(b"abc", 4);
        assert!(fingerprints_match(&fp, &fp.replace(' ', "").to_uppercase()));
        assert!(!fingerprints_match(&fp, &fingerprint(b"abd", 4)));
        assert!(!fingerprints_match(&fp, ""));
    }
}
