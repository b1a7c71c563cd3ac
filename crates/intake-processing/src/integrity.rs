//! Content hashing.

use sha2::{Digest, Sha256};

use crate::validator::ValidationError;

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Recompute the hash of `data` and compare it with `expected` (case-insensitive).
pub fn verify_content_hash(expected: &str, data: &[u8]) -> Result<(), ValidationError> {
    let actual = sha256_hex(data);
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(ValidationError::HashMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_verify_content_hash() {
        let hash = sha256_hex(b"resume body");
        assert!(verify_content_hash(&hash, b"resume body").is_ok());
        assert!(verify_content_hash(&hash.to_uppercase(), b"resume body").is_ok());
        assert!(matches!(
            verify_content_hash(&hash, b"tampered body"),
            Err(ValidationError::HashMismatch { .. })
        ));
    }
}
