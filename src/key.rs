//! Content key derivation
//!
//! Keys must be stable across processes so a snapshot written by one run can be used
//! to skip downloads in the next. Each input is prefixed with its byte length before
//! hashing so that `("ab", "c")` and `("a", "bc")` never produce the same key.

use sha2::{Digest, Sha256};

use crate::types::ContentKey;

/// Derive the content key of a bundle file from its manifest version and filename.
///
/// # Examples
///
/// ```
/// use bundle_harvester::key::derive_key;
///
/// let a = derive_key("1.0", "a.mac");
/// assert_eq!(a, derive_key("1.0", "a.mac"));
/// assert_ne!(a, derive_key("1.0a", ".mac"));
/// ```
#[must_use]
pub fn derive_key(version: &str, filename: &str) -> ContentKey {
    let mut hasher = Sha256::new();
    for part in [version, filename] {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    ContentKey::from_bytes(hasher.finalize().into())
}
