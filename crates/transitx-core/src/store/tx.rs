use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use transitx_core_types::{DatasetId, Version};

use super::record::CollectionMap;
use super::storage::VersionStorage;
use super::version::VersionState;
use super::versioned::{storage_failure, CommitOutcome, DatasetCell};
use crate::errors::{ExErrorKind, Result};
use crate::{log_op_end, log_op_error, log_op_start};

/// Read-only view of one dataset version
///
/// Holds the version alive for as long as the transaction exists; later
/// commits never change what it sees.
#[derive(Debug, Clone)]
pub struct ReadTx {
    dataset_id: DatasetId,
    state: Arc<VersionState>,
}

impl ReadTx {
    pub(crate) fn new(dataset_id: DatasetId, state: Arc<VersionState>) -> Self {
        Self { dataset_id, state }
    }

    pub fn dataset_id(&self) -> &DatasetId {
        &self.dataset_id
    }

    pub fn version(&self) -> Version {
        self.state.version()
    }

    pub fn get_map(&self, name: &str) -> Option<&CollectionMap> {
        self.state.collection(name).map(|c| c.as_ref())
    }

    /// Decode one record; `None` if the collection or key is absent
    pub fn get_as<T: DeserializeOwned>(&self, collection: &str, key: &str) -> Result<Option<T>> {
        match self.get_map(collection) {
            Some(map) => Ok(map.get_as(key)?),
            None => Ok(None),
        }
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.state.collection_names().map(str::to_string).collect()
    }

    pub fn record_count(&self) -> usize {
        self.state.record_count()
    }

    pub fn state(&self) -> &Arc<VersionState> {
        &self.state
    }
}

/// Exclusive read-write handle on a dataset
///
/// Mutations live only in this handle until `commit`. Dropping it without
/// committing rolls back.
pub struct WriteTx {
    cell: Arc<DatasetCell>,
    storage: Arc<dyn VersionStorage>,
    base: Arc<VersionState>,
    collections: BTreeMap<String, Arc<CollectionMap>>,
    opened_at: Instant,
    finished: bool,
}

impl WriteTx {
    pub(crate) fn new(
        cell: Arc<DatasetCell>,
        storage: Arc<dyn VersionStorage>,
        base: Arc<VersionState>,
    ) -> Self {
        let collections = base.collections().clone();
        Self {
            cell,
            storage,
            base,
            collections,
            opened_at: Instant::now(),
            finished: false,
        }
    }

    pub fn dataset_id(&self) -> &DatasetId {
        &self.cell.dataset_id
    }

    /// Version the transaction was seeded from (0 for an empty dataset)
    pub fn base_version(&self) -> Version {
        self.base.version()
    }

    pub fn get_map(&self, name: &str) -> Option<&CollectionMap> {
        self.collections.get(name).map(|c| c.as_ref())
    }

    /// Mutable collection, created empty if absent
    ///
    /// The first mutable access copies the collection's key index; records
    /// stay shared with the base version until replaced.
    pub fn get_map_mut(&mut self, name: &str) -> &mut CollectionMap {
        let entry = self
            .collections
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CollectionMap::new(name)));
        Arc::make_mut(entry)
    }

    pub fn get_as<T: DeserializeOwned>(&self, collection: &str, key: &str) -> Result<Option<T>> {
        match self.get_map(collection) {
            Some(map) => Ok(map.get_as(key)?),
            None => Ok(None),
        }
    }

    pub fn put_as<T: Serialize>(&mut self, collection: &str, key: &str, value: &T) -> Result<()> {
        self.get_map_mut(collection).put_as(key, value)?;
        Ok(())
    }

    /// Remove a record; returns whether it existed
    pub fn remove(&mut self, collection: &str, key: &str) -> bool {
        if !self.collections.contains_key(collection) {
            return false;
        }
        self.get_map_mut(collection).remove(key).is_some()
    }

    /// Drop a whole collection from the next version
    pub fn drop_collection(&mut self, name: &str) -> bool {
        self.collections.remove(name).is_some()
    }

    /// Publish every mutation as a new version
    ///
    /// The writer slot is released whether or not the commit succeeds. A
    /// failed commit publishes nothing; its version number is never reused.
    pub fn commit(mut self) -> Result<CommitOutcome> {
        let started = Instant::now();
        let dataset_id = self.cell.dataset_id.clone();
        log_op_start!("commit", dataset_id = %dataset_id, base_version = self.base.version().get());

        let result = self.publish();
        self.finished = true;
        self.cell.release_writer();

        let duration_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(outcome) => log_op_end!(
                "commit",
                duration_ms = duration_ms,
                dataset_id = %dataset_id,
                version = outcome.version.get()
            ),
            Err(e) => log_op_error!(
                "commit",
                *e,
                duration_ms = duration_ms,
                dataset_id = %dataset_id
            ),
        }
        result
    }

    /// Discard every mutation
    pub fn rollback(mut self) {
        self.finished = true;
        self.cell.release_writer();
        tracing::debug!(
            dataset_id = %self.cell.dataset_id,
            base_version = self.base.version().get(),
            "Rolled back write transaction"
        );
    }

    fn publish(&mut self) -> Result<CommitOutcome> {
        let dataset_id = &self.cell.dataset_id;
        let version = self.cell.lock()?.allocate(dataset_id)?;

        let base_version = Some(self.base.version()).filter(|v| *v != Version::ZERO);
        let collections = std::mem::take(&mut self.collections);
        let state = VersionState::new(version, base_version, collections, Utc::now());

        if let Err(e) = self
            .storage
            .persist_version(dataset_id, &state, version.next(), true)
        {
            if e.kind() == ExErrorKind::CorruptionDetected {
                self.cell.flag_corrupt(self.storage.as_ref(), e.message());
            }
            return Err(storage_failure("commit", dataset_id, e).with_version(version));
        }

        self.cell.lock()?.publish(Arc::new(state), true);
        Ok(CommitOutcome {
            dataset_id: dataset_id.clone(),
            version,
            base_version,
        })
    }
}

impl Drop for WriteTx {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(
                dataset_id = %self.cell.dataset_id,
                base_version = self.base.version().get(),
                open_ms = self.opened_at.elapsed().as_millis() as u64,
                "Write transaction dropped without commit or rollback; rolling back"
            );
            self.cell.release_writer();
        }
    }
}

impl std::fmt::Debug for WriteTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteTx")
            .field("dataset_id", &self.cell.dataset_id)
            .field("base_version", &self.base.version())
            .field("collections", &self.collections.len())
            .finish()
    }
}
