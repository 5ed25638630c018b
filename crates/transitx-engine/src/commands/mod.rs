//! Built-in jobs over the record store and the snapshot registry
//!
//! Each command is a `JobLogic`; construct it, wrap it with
//! `JobManager::create_job` and submit the resulting job.

pub mod import;
pub mod snapshot;
pub mod validate;

pub use import::{ImportBatch, ImportRecordsJob};
pub use snapshot::{CreateSnapshotJob, PromoteSnapshotJob, RestoreSnapshotJob};
pub use validate::{validate_dataset, ValidateFeedJob, ValidationReport};
