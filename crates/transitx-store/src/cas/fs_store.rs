//! Filesystem-based Content-Addressable Storage
//!
//! Provides atomic writes, collision detection, and verified reads

#![allow(clippy::result_large_err)]

use crate::cas::atomic::atomic_write;
use crate::cas::sharding::shard_path;
use crate::errors::{cas_collision, cas_missing, digest_mismatch, io_error, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const EXTENSIONS: [&str; 2] = ["json", "bin"];

/// Hex SHA256 digest of `content`
pub fn compute_digest(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Filesystem-based CAS store
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Create a new CAS store at the given root directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write content to CAS and return the digest
    ///
    /// - Idempotent: writing the same content twice succeeds
    /// - Detects collisions: different content under an existing digest fails
    pub fn write(&self, content: &[u8], extension: &str) -> Result<String> {
        let digest = compute_digest(content);
        let target_path = shard_path(&self.root, &digest, extension);

        match fs::read(&target_path) {
            Ok(existing) if existing == content => return Ok(digest),
            Ok(_) => return Err(cas_collision(&digest)),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(io_error("read_cas", e)),
        }

        atomic_write(&target_path, content)?;

        Ok(digest)
    }

    /// Read content by digest without verifying it
    pub fn read(&self, digest: &str) -> Result<Vec<u8>> {
        for ext in &EXTENSIONS {
            let path = shard_path(&self.root, digest, ext);
            match fs::read(&path) {
                Ok(bytes) => return Ok(bytes),
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(io_error("read_cas", e)),
            }
        }

        Err(cas_missing(digest))
    }

    /// Read content by digest and check it still hashes to that digest
    ///
    /// A mismatch is reported as `CorruptionDetected`.
    pub fn read_verified(&self, digest: &str) -> Result<Vec<u8>> {
        let bytes = self.read(digest)?;
        let actual = compute_digest(&bytes);
        if actual != digest {
            return Err(digest_mismatch(digest, &actual));
        }
        Ok(bytes)
    }

    pub fn exists(&self, digest: &str) -> bool {
        EXTENSIONS
            .iter()
            .any(|ext| shard_path(&self.root, digest, ext).exists())
    }
}
