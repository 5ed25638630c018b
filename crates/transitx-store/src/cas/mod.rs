//! Content-Addressable Storage (CAS)
//!
//! Record bodies and collection manifests are stored once per distinct
//! content, so versions that share records share blobs.
//!
//! Provides:
//! - Filesystem-based CAS with atomic writes
//! - Collision detection and read-time digest verification
//! - Sharding by first 2 hex chars of digest

mod atomic;
mod fs_store;
mod sharding;

pub use fs_store::{compute_digest, FsStore};
