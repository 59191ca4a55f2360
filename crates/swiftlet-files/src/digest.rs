//! SHA-1 digest wrapper.
//!
//! The wire format fixes 20-byte digests; every hash in the tree and on
//! the wire goes through this module.

use sha1::{Digest, Sha1};

/// Digest size in bytes.
pub const DIGEST_SIZE: usize = 20;

/// Hash a byte slice to a 20-byte SHA-1 digest.
#[must_use]
pub fn sha1_digest(data: &[u8]) -> [u8; DIGEST_SIZE] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}
