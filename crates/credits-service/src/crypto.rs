//! Cryptographic utilities for API key verification.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 digest of `value`.
#[must_use]
pub fn sha256_hex(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

/// Compare a presented API key with the configured one.
///
/// Both keys are hashed first so the comparison runs over equal-length
/// digests and leaks neither content nor length.
#[must_use]
pub fn api_key_matches(presented: &str, expected: &str) -> bool {
    constant_time_eq(&sha256_hex(presented), &sha256_hex(expected))
}

/// Constant-time string comparison to prevent timing attacks.
///
/// # Returns
///
/// `true` if the strings are equal, `false` otherwise.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}
