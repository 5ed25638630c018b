//! Sharding logic for CAS
//!
//! Blobs live in subdirectories named after the first 2 hex characters of
//! their digest, keeping directory sizes bounded.

use std::path::{Path, PathBuf};

/// Compute the shard path for a given digest
///
/// For digest "abc123...", returns "<root>/ab/abc123.<ext>"
pub fn shard_path(root: &Path, digest: &str, extension: &str) -> PathBuf {
    let shard = &digest[..2.min(digest.len())];

    root.join(shard).join(format!("{}.{}", digest, extension))
}
