//! WD-014: Project content hashing.
//!
//! `SHA1("OpenWhisk" + decimal(len) + NUL + bytes)`, lowercase hex. The
//! hash marks which manifest revision created a managed entity.

use sha1::{Digest, Sha1};
use std::path::Path;

const HASH_PREFIX: &[u8] = b"OpenWhisk";

/// Hash manifest bytes.
///
/// The length is written as decimal digits, so hashes differ from markers
/// that encoded the length as a single character. Only the project name in
/// the marker decides ownership, so those entities are still reconciled.
pub fn hash_bytes(content: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(HASH_PREFIX);
    hasher.update(content.len().to_string().as_bytes());
    hasher.update(b"\0");
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Hash a manifest file.
pub fn hash_file(path: &Path) -> Result<String, String> {
    let content =
        std::fs::read(path).map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    Ok(hash_bytes(&content))
}
