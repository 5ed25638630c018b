//! TransitX Store - Durable persistence for datasets and snapshots
//!
//! Provides:
//! - SQLite schema with migrations framework
//! - Content-addressable storage (CAS) for record bodies
//! - SQLite-backed version storage for the MVCC record store
//! - Snapshot registry (create, list, promote, obsolete, restore)
//! - `DataDir` wiring all of the above under one directory

pub mod cas;
pub mod data_dir;
pub mod db;
pub mod errors;
pub mod migrations;
pub mod records;
pub mod snapshot;

// Re-export key types
pub use data_dir::DataDir;
pub use errors::Result;
pub use records::SqliteVersionStorage;
pub use snapshot::{SnapshotIter, SnapshotRegistry};
