use std::collections::BTreeSet;
use transitx_core_types::{DatasetId, Version};

use super::version::VersionState;
use crate::errors::Result;

/// What durable storage knows about a dataset when it is first touched
#[derive(Debug, Clone)]
pub struct DatasetImage {
    /// Committed head, `None` if nothing was ever committed
    pub head: Option<VersionState>,
    /// Next version number to allocate
    pub next_version: Version,
    /// Every retained version, head included
    pub versions: BTreeSet<Version>,
    /// Reason the dataset was flagged corrupt, if it was
    pub corrupted: Option<String>,
}

/// Durable backing for the versioned record store
///
/// Implementations must be safe to call from many threads. Errors other than
/// `CorruptionDetected` abort the calling commit and surface as `StorageIo`.
pub trait VersionStorage: Send + Sync {
    /// Load the head and version index of a dataset, `None` if unknown
    fn load_dataset(&self, dataset_id: &DatasetId) -> Result<Option<DatasetImage>>;

    /// Load one retained version
    fn load_version(&self, dataset_id: &DatasetId, version: Version) -> Result<VersionState>;

    /// Durably record `state`; when `publish_head` is set it also becomes the head
    ///
    /// `next_version` is the counter value after allocating `state.version()`.
    fn persist_version(
        &self,
        dataset_id: &DatasetId,
        state: &VersionState,
        next_version: Version,
        publish_head: bool,
    ) -> Result<()>;

    /// Flag (`Some(reason)`) or clear (`None`) dataset corruption
    fn mark_corrupt(&self, dataset_id: &DatasetId, reason: Option<&str>) -> Result<()>;

    /// Whether `load_version` can bring back any persisted version
    ///
    /// When it cannot, the store keeps every version resident; otherwise only
    /// the head and versions someone still holds stay in memory.
    fn reloads_versions(&self) -> bool {
        true
    }
}

/// Storage that keeps nothing beyond process memory
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopVersionStorage;

impl VersionStorage for NoopVersionStorage {
    fn load_dataset(&self, _dataset_id: &DatasetId) -> Result<Option<DatasetImage>> {
        Ok(None)
    }

    fn load_version(&self, dataset_id: &DatasetId, version: Version) -> Result<VersionState> {
        Err(crate::errors::RecordStoreError::UnknownVersion {
            dataset_id: dataset_id.to_string(),
            version: version.get(),
        }
        .into())
    }

    fn persist_version(
        &self,
        _dataset_id: &DatasetId,
        _state: &VersionState,
        _next_version: Version,
        _publish_head: bool,
    ) -> Result<()> {
        Ok(())
    }

    fn mark_corrupt(&self, _dataset_id: &DatasetId, _reason: Option<&str>) -> Result<()> {
        Ok(())
    }

    fn reloads_versions(&self) -> bool {
        false
    }
}
