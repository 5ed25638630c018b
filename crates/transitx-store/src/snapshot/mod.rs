//! Snapshot registry persistence.
//!
//! ## Responsibilities
//!
//! - Ledger of snapshots keyed by `(dataset_id, version)` in SQLite
//! - The single current snapshot per dataset, enforced by a partial unique index
//! - Creating snapshots by pinning or forking record-store versions
//! - Seeding write transactions for restore
//!
//! ## Non-Responsibilities
//!
//! - Version allocation and record storage (handled by `transitx-core`)
//! - Orchestration as jobs (handled by `transitx-engine`)

pub mod query;
pub mod registry;

pub use registry::{SnapshotIter, SnapshotRegistry, DEFAULT_PAGE_SIZE};
