//! Content hashing for title lookups.

use sha2::{Digest, Sha256};

/// SHA-256 of the title, lowercase hex.
///
/// Titles are hashed verbatim: case and surrounding whitespace are significant.
pub fn hash_title(title: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    format!("{:x}", hasher.finalize())
}
