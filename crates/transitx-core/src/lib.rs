//! TransitX Core - versioned record store and domain model
//!
//! This crate provides the foundational pieces every other TransitX crate
//! builds on:
//! - Structured error facility (`ExError`, `ExErrorKind`)
//! - Structured logging facility with test capture
//! - Domain model: job `Status`, `Snapshot` metadata, transit entities
//! - Multi-version record store: read/write transactions over ordered
//!   collections, copy-on-write versions, pluggable `VersionStorage`

pub mod errors;
pub mod logging_facility;
pub mod model;
pub mod store;

pub use transitx_core_types as core_types;

// Re-export commonly used types
pub use errors::{ExError, ExErrorKind, RecordStoreError, Result};
pub use model::{Snapshot, SnapshotKey, SnapshotMetadata, Status};
pub use store::{
    CollectionMap, CommitOutcome, ReadTx, VersionState, VersionStorage, VersionedStore,
    WriteConflictPolicy, WriteTx,
};
