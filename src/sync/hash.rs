//! Schema hashing for header shapes.
//!
//! When the remote does not report a schema hash, the column layout itself
//! is fingerprinted so a reordered or renamed column is noticed on the next
//! sync.

use sha2::{Digest, Sha256};

/// SHA256 over the column names, in order.
///
/// Each name is length-prefixed so `["ab", "c"]` and `["a", "bc"]` differ.
#[must_use]
pub fn schema_hash(header_shape: &[String]) -> String {
    let mut hasher = Sha256::new();
    for column in header_shape {
        hasher.update((column.len() as u64).to_le_bytes());
        hasher.update(column.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Check if the header layout changed since the stored hash.
///
/// Returns `true` if there is no stored hash or the hashes differ.
#[must_use]
pub fn has_changed(current_hash: &str, stored_hash: Option<&str>) -> bool {
    stored_hash.is_none_or(|h| h != current_hash)
}
