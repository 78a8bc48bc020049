//! Release digest: the idempotency key for release creation.

use sha2::{Digest, Sha256};

use crate::types::ReleaseFile;

/// Compute the SHA-256 digest of a release file set.
///
/// Files are hashed in path order, so the same set yields the same digest
/// regardless of discovery order. Every field is length-prefixed to keep
/// `("ab", "c")` and `("a", "bc")` apart.
pub fn release_digest(files: &[ReleaseFile]) -> String {
    let mut sorted: Vec<&ReleaseFile> = files.iter().collect();
    sorted.sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.version.cmp(&b.version)));

    let mut hasher = Sha256::new();
    for file in sorted {
        for field in [
            file.path.as_bytes(),
            file.version.as_bytes(),
            file.change_type.as_str().as_bytes(),
            file.statement.as_bytes(),
        ] {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field);
        }
    }
    hex::encode(hasher.finalize())
}
