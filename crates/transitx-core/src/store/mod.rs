//! Multi-version record store
//!
//! - `record`: ordered collections of shared JSON records
//! - `version`: immutable per-version images
//! - `storage`: durable backing seam
//! - `tx`: read and write transactions
//! - `versioned`: the store itself, writer arbitration and version allocation

pub mod record;
pub mod storage;
pub mod tx;
pub mod version;
pub mod versioned;

pub use record::{CollectionMap, Record};
pub use storage::{DatasetImage, NoopVersionStorage, VersionStorage};
pub use tx::{ReadTx, WriteTx};
pub use version::VersionState;
pub use versioned::{CommitOutcome, VersionedStore, WriteConflictPolicy};
