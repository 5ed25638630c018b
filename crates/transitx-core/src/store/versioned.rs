use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock, Weak};
use std::time::{Duration, Instant};
use transitx_core_types::{DatasetId, Version};

use super::storage::{NoopVersionStorage, VersionStorage};
use super::tx::{ReadTx, WriteTx};
use super::version::VersionState;
use crate::errors::{ExError, ExErrorKind, RecordStoreError, Result};
use crate::{log_op_end, log_op_error, log_op_start};

/// What a second writer experiences while a dataset already has one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteConflictPolicy {
    /// Fail immediately with `ConcurrentWriteConflict`
    #[default]
    Fail,
    /// Wait for the writer to finish, failing with `ConcurrentWriteConflict`
    /// once `timeout` has elapsed
    Block { timeout: Duration },
}

/// Result of a successful commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    pub dataset_id: DatasetId,
    pub version: Version,
    /// Version the write transaction was seeded from, if any
    pub base_version: Option<Version>,
}

pub(crate) struct DatasetState {
    pub(crate) head: Option<Version>,
    pub(crate) next_version: Version,
    pub(crate) known: BTreeSet<Version>,
    /// Versions kept in memory regardless of readers; always includes the head
    pinned: BTreeMap<Version, Arc<VersionState>>,
    /// Versions that stay in memory only while a transaction holds them
    cached: BTreeMap<Version, Weak<VersionState>>,
    /// Pin every version, for storage that cannot reload them
    retain_all: bool,
    pub(crate) writer_open: bool,
    pub(crate) corrupted: Option<String>,
}

impl DatasetState {
    fn new(retain_all: bool) -> Self {
        Self {
            head: None,
            next_version: Version::new(1),
            known: BTreeSet::new(),
            pinned: BTreeMap::new(),
            cached: BTreeMap::new(),
            retain_all,
            writer_open: false,
            corrupted: None,
        }
    }

    fn head_state(&self) -> Arc<VersionState> {
        self.head
            .and_then(|v| self.pinned.get(&v).cloned())
            .unwrap_or_else(|| Arc::new(VersionState::empty()))
    }

    fn resident(&self, version: Version) -> Option<Arc<VersionState>> {
        self.pinned
            .get(&version)
            .cloned()
            .or_else(|| self.cached.get(&version).and_then(Weak::upgrade))
    }

    /// Remember a version that is not the head
    fn cache(&mut self, state: Arc<VersionState>) {
        self.cached.retain(|_, s| s.strong_count() > 0);
        if self.retain_all {
            self.pinned.insert(state.version(), state);
        } else {
            self.cached.insert(state.version(), Arc::downgrade(&state));
        }
    }

    /// Hand out the next version number
    pub(crate) fn allocate(&mut self, dataset_id: &DatasetId) -> Result<Version> {
        if let Some(reason) = &self.corrupted {
            return Err(RecordStoreError::Corrupted {
                dataset_id: dataset_id.to_string(),
                reason: reason.clone(),
            }
            .into());
        }
        let version = self.next_version;
        self.next_version = version.next();
        Ok(version)
    }

    pub(crate) fn publish(&mut self, state: Arc<VersionState>, as_head: bool) {
        let version = state.version();
        self.known.insert(version);
        if as_head && self.head.map_or(true, |h| h < version) {
            let previous = self.head.replace(version);
            self.pinned.insert(version, state);
            if let Some(previous) = previous.filter(|_| !self.retain_all) {
                if let Some(old) = self.pinned.remove(&previous) {
                    self.cached.insert(previous, Arc::downgrade(&old));
                }
            }
            self.cached.retain(|_, s| s.strong_count() > 0);
        } else {
            self.cache(state);
        }
    }
}

/// Per-dataset concurrency cell: state lock plus the writer hand-off signal
pub(crate) struct DatasetCell {
    pub(crate) dataset_id: DatasetId,
    state: Mutex<DatasetState>,
    writer_released: Condvar,
}

impl DatasetCell {
    pub(crate) fn lock(&self) -> std::result::Result<MutexGuard<'_, DatasetState>, RecordStoreError> {
        self.state.lock().map_err(|_| RecordStoreError::LockPoisoned {
            what: format!("dataset {}", self.dataset_id),
        })
    }

    /// Free the writer slot; runs on every exit path, so tolerates poisoning
    pub(crate) fn release_writer(&self) {
        let mut st = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        st.writer_open = false;
        drop(st);
        self.writer_released.notify_all();
    }

    /// Refuse further writes and tell storage about it
    pub(crate) fn flag_corrupt(&self, storage: &dyn VersionStorage, reason: &str) {
        let mut st = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        st.corrupted = Some(reason.to_string());
        drop(st);
        tracing::warn!(
            dataset_id = %self.dataset_id,
            reason = reason,
            "Dataset flagged corrupt; writes refused until cleared"
        );
        if let Err(e) = storage.mark_corrupt(&self.dataset_id, Some(reason)) {
            tracing::warn!(dataset_id = %self.dataset_id, error = %e, "Could not persist corruption flag");
        }
    }
}

/// Map a storage failure onto the store's error taxonomy
///
/// Corruption keeps its kind; anything else is fatal to the operation as
/// `StorageIo`.
pub(crate) fn storage_failure(op: &str, dataset_id: &DatasetId, err: ExError) -> ExError {
    match err.kind() {
        ExErrorKind::CorruptionDetected | ExErrorKind::NotFound => err,
        _ => ExError::new(ExErrorKind::StorageIo)
            .with_op(op)
            .with_dataset_id(dataset_id.clone())
            .with_message(format!("Storage failure: {}", err.message()))
            .with_source(err),
    }
}

/// Multi-version record store
///
/// Every dataset is a sequence of immutable versions. Readers pin one version
/// and are never affected by writers; each dataset admits one writer at a
/// time. Committing a write transaction allocates the next version number
/// from the dataset's monotonic counter and publishes it as the new head.
pub struct VersionedStore {
    storage: Arc<dyn VersionStorage>,
    policy: WriteConflictPolicy,
    datasets: RwLock<HashMap<DatasetId, Arc<DatasetCell>>>,
}

impl VersionedStore {
    pub fn new(storage: Arc<dyn VersionStorage>, policy: WriteConflictPolicy) -> Self {
        Self {
            storage,
            policy,
            datasets: RwLock::new(HashMap::new()),
        }
    }

    /// Store that keeps nothing beyond process memory
    pub fn in_memory(policy: WriteConflictPolicy) -> Self {
        Self::new(Arc::new(NoopVersionStorage), policy)
    }

    pub fn policy(&self) -> WriteConflictPolicy {
        self.policy
    }

    /// Read transaction pinned to the committed head
    ///
    /// A dataset with no commits reads as version 0 with no collections.
    pub fn open_read(&self, dataset_id: &DatasetId) -> Result<ReadTx> {
        let cell = self.cell(dataset_id)?;
        let state = cell.lock()?.head_state();
        Ok(ReadTx::new(dataset_id.clone(), state))
    }

    /// Read transaction pinned to any retained version
    pub fn open_read_at(&self, dataset_id: &DatasetId, version: Version) -> Result<ReadTx> {
        let cell = self.cell(dataset_id)?;
        let state = self.version_state(&cell, version)?;
        Ok(ReadTx::new(dataset_id.clone(), state))
    }

    /// Write transaction seeded from the head
    pub fn open_write(&self, dataset_id: &DatasetId) -> Result<WriteTx> {
        self.begin_write(dataset_id, None, None)
    }

    /// Write transaction that only opens if the head is still `expected_head`
    pub fn open_write_expecting(
        &self,
        dataset_id: &DatasetId,
        expected_head: Version,
    ) -> Result<WriteTx> {
        self.begin_write(dataset_id, Some(expected_head), None)
    }

    /// Write transaction seeded from any retained version
    pub fn open_write_from(&self, dataset_id: &DatasetId, version: Version) -> Result<WriteTx> {
        self.begin_write(dataset_id, None, Some(version))
    }

    /// Allocate a new version with exactly the content of `source`
    ///
    /// The new version shares every collection with `source` and does not
    /// move the head.
    pub fn fork_version(&self, dataset_id: &DatasetId, source: Version) -> Result<Version> {
        let started = Instant::now();
        log_op_start!("fork_version", dataset_id = %dataset_id, source_version = source.get());

        let result = self.fork_inner(dataset_id, source);
        let duration_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(version) => log_op_end!(
                "fork_version",
                duration_ms = duration_ms,
                dataset_id = %dataset_id,
                version = version.get()
            ),
            Err(e) => log_op_error!(
                "fork_version",
                *e,
                duration_ms = duration_ms,
                dataset_id = %dataset_id
            ),
        }
        result
    }

    fn fork_inner(&self, dataset_id: &DatasetId, source: Version) -> Result<Version> {
        let cell = self.cell(dataset_id)?;
        let source_state = self.version_state(&cell, source)?;
        let version = cell.lock()?.allocate(dataset_id)?;
        let state = source_state.rebased(version);

        if let Err(e) = self
            .storage
            .persist_version(dataset_id, &state, version.next(), false)
        {
            if e.kind() == ExErrorKind::CorruptionDetected {
                cell.flag_corrupt(self.storage.as_ref(), e.message());
            }
            return Err(storage_failure("fork_version", dataset_id, e));
        }

        cell.lock()?.publish(Arc::new(state), false);
        Ok(version)
    }

    pub fn head_version(&self, dataset_id: &DatasetId) -> Result<Option<Version>> {
        let cell = self.cell(dataset_id)?;
        let head = cell.lock()?.head;
        Ok(head)
    }

    pub fn has_version(&self, dataset_id: &DatasetId, version: Version) -> Result<bool> {
        let cell = self.cell(dataset_id)?;
        let known = cell.lock()?.known.contains(&version);
        Ok(known)
    }

    /// All retained versions, ascending
    pub fn list_versions(&self, dataset_id: &DatasetId) -> Result<Vec<Version>> {
        let cell = self.cell(dataset_id)?;
        let versions = cell.lock()?.known.iter().copied().collect();
        Ok(versions)
    }

    /// Versions currently held in memory, ascending
    ///
    /// With durable storage this is the head plus whatever open transactions
    /// still pin; every other version is reloaded on demand.
    pub fn resident_versions(&self, dataset_id: &DatasetId) -> Result<Vec<Version>> {
        let cell = self.cell(dataset_id)?;
        let st = cell.lock()?;
        let versions = st
            .known
            .iter()
            .copied()
            .filter(|v| st.resident(*v).is_some())
            .collect();
        Ok(versions)
    }

    /// Why the dataset refuses writes, if it does
    pub fn corruption(&self, dataset_id: &DatasetId) -> Result<Option<String>> {
        let cell = self.cell(dataset_id)?;
        let reason = cell.lock()?.corrupted.clone();
        Ok(reason)
    }

    /// Flag a dataset corrupt; it refuses writes until `clear_corruption`
    pub fn report_corruption(&self, dataset_id: &DatasetId, reason: &str) -> Result<()> {
        let cell = self.cell(dataset_id)?;
        cell.flag_corrupt(self.storage.as_ref(), reason);
        Ok(())
    }

    /// Operator action: accept the dataset's current state and allow writes again
    pub fn clear_corruption(&self, dataset_id: &DatasetId) -> Result<()> {
        self.storage
            .mark_corrupt(dataset_id, None)
            .map_err(|e| storage_failure("clear_corruption", dataset_id, e))?;

        let cached = self
            .datasets
            .read()
            .map_err(|_| poisoned("dataset index"))?
            .get(dataset_id)
            .cloned();
        if let Some(cell) = cached {
            cell.lock()?.corrupted = None;
        }
        tracing::info!(dataset_id = %dataset_id, "Dataset corruption flag cleared");
        Ok(())
    }

    fn begin_write(
        &self,
        dataset_id: &DatasetId,
        expected_head: Option<Version>,
        seed: Option<Version>,
    ) -> Result<WriteTx> {
        let cell = self.cell(dataset_id)?;
        let seeded = match seed {
            Some(version) => Some(self.version_state(&cell, version)?),
            None => None,
        };

        let st = cell.lock()?;
        let mut st = self.acquire_writer(&cell, st)?;

        if let Some(reason) = st.corrupted.clone() {
            st.writer_open = false;
            drop(st);
            cell.writer_released.notify_all();
            return Err(RecordStoreError::Corrupted {
                dataset_id: dataset_id.to_string(),
                reason,
            }
            .into());
        }

        let head = st.head.unwrap_or(Version::ZERO);
        if let Some(expected) = expected_head {
            if expected != head {
                st.writer_open = false;
                drop(st);
                cell.writer_released.notify_all();
                return Err(RecordStoreError::HeadMoved {
                    dataset_id: dataset_id.to_string(),
                    expected: expected.get(),
                    actual: head.get(),
                }
                .into());
            }
        }

        let base = seeded.unwrap_or_else(|| st.head_state());
        drop(st);

        tracing::debug!(
            dataset_id = %dataset_id,
            base_version = base.version().get(),
            "Opened write transaction"
        );
        Ok(WriteTx::new(cell, self.storage.clone(), base))
    }

    fn acquire_writer<'a>(
        &self,
        cell: &'a DatasetCell,
        mut st: MutexGuard<'a, DatasetState>,
    ) -> Result<MutexGuard<'a, DatasetState>> {
        match self.policy {
            WriteConflictPolicy::Fail => {
                if st.writer_open {
                    return Err(RecordStoreError::WriterBusy {
                        dataset_id: cell.dataset_id.to_string(),
                    }
                    .into());
                }
            }
            WriteConflictPolicy::Block { timeout } => {
                let started = Instant::now();
                while st.writer_open {
                    let waited = started.elapsed();
                    if waited >= timeout {
                        return Err(RecordStoreError::WriterWaitTimedOut {
                            dataset_id: cell.dataset_id.to_string(),
                            waited_ms: waited.as_millis() as u64,
                        }
                        .into());
                    }
                    let (guard, _) = cell
                        .writer_released
                        .wait_timeout(st, timeout - waited)
                        .map_err(|_| poisoned(&format!("dataset {}", cell.dataset_id)))?;
                    st = guard;
                }
            }
        }
        st.writer_open = true;
        Ok(st)
    }

    fn version_state(&self, cell: &DatasetCell, version: Version) -> Result<Arc<VersionState>> {
        {
            let st = cell.lock()?;
            if let Some(state) = st.resident(version) {
                return Ok(state);
            }
            if version == Version::ZERO && st.head.is_none() {
                return Ok(Arc::new(VersionState::empty()));
            }
            if !st.known.contains(&version) {
                return Err(RecordStoreError::UnknownVersion {
                    dataset_id: cell.dataset_id.to_string(),
                    version: version.get(),
                }
                .into());
            }
        }

        let loaded = match self.storage.load_version(&cell.dataset_id, version) {
            Ok(state) => state,
            Err(e) => {
                if e.kind() == ExErrorKind::CorruptionDetected {
                    cell.flag_corrupt(self.storage.as_ref(), e.message());
                }
                return Err(storage_failure("load_version", &cell.dataset_id, e));
            }
        };

        // Another reader may have loaded it meanwhile; share theirs
        let mut st = cell.lock()?;
        if let Some(state) = st.resident(version) {
            return Ok(state);
        }
        let state = Arc::new(loaded);
        st.cache(state.clone());
        Ok(state)
    }

    fn cell(&self, dataset_id: &DatasetId) -> Result<Arc<DatasetCell>> {
        if dataset_id.is_blank() {
            return Err(ExError::new(ExErrorKind::InvalidInput)
                .with_op("open_dataset")
                .with_message("dataset id must not be empty"));
        }

        if let Some(cell) = self
            .datasets
            .read()
            .map_err(|_| poisoned("dataset index"))?
            .get(dataset_id)
        {
            return Ok(cell.clone());
        }

        let image = match self.storage.load_dataset(dataset_id) {
            Ok(image) => image,
            Err(e) => {
                if e.kind() == ExErrorKind::CorruptionDetected {
                    tracing::warn!(dataset_id = %dataset_id, error = %e, "Dataset failed verification on load");
                    if let Err(flag_err) = self.storage.mark_corrupt(dataset_id, Some(e.message())) {
                        tracing::warn!(dataset_id = %dataset_id, error = %flag_err, "Could not persist corruption flag");
                    }
                }
                return Err(storage_failure("load_dataset", dataset_id, e));
            }
        };

        let mut state = DatasetState::new(!self.storage.reloads_versions());
        if let Some(image) = image {
            state.next_version = image.next_version;
            state.known = image.versions;
            state.corrupted = image.corrupted;
            if let Some(head) = image.head {
                state.head = Some(head.version());
                state.pinned.insert(head.version(), Arc::new(head));
            }
        }

        let mut datasets = self
            .datasets
            .write()
            .map_err(|_| poisoned("dataset index"))?;
        let cell = datasets
            .entry(dataset_id.clone())
            .or_insert_with(|| {
                Arc::new(DatasetCell {
                    dataset_id: dataset_id.clone(),
                    state: Mutex::new(state),
                    writer_released: Condvar::new(),
                })
            })
            .clone();
        Ok(cell)
    }
}

fn poisoned(what: &str) -> ExError {
    RecordStoreError::LockPoisoned {
        what: what.to_string(),
    }
    .into()
}
