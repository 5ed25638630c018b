//! Snapshot registry.
//!
//! Owns the mapping from `(dataset, version)` to snapshot metadata and the
//! single "current" pointer per dataset. Version numbers always come from
//! the record store's per-dataset counter.

#![allow(clippy::result_large_err)]

use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use transitx_core::errors::{ExError, ExErrorKind};
use transitx_core::model::{Snapshot, SnapshotKey, SnapshotMetadata};
use transitx_core::{log_op_end, log_op_error, log_op_start, VersionedStore, WriteTx};
use transitx_core_types::{DatasetId, Version};

use crate::db::{self, SharedConnection};
use crate::errors::{from_rusqlite, Result};
use crate::snapshot::query;

/// Rows fetched per round trip when listing history
pub const DEFAULT_PAGE_SIZE: usize = 100;

pub struct SnapshotRegistry {
    conn: SharedConnection,
    records: Arc<VersionedStore>,
    page_size: usize,
}

impl SnapshotRegistry {
    pub fn new(conn: SharedConnection, records: Arc<VersionedStore>) -> Self {
        Self {
            conn,
            records,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// The record store whose versions the snapshots name
    pub fn records(&self) -> &Arc<VersionedStore> {
        &self.records
    }

    /// Fix the state of `source_version` as a named snapshot
    ///
    /// If `source_version` has no snapshot yet, the snapshot pins it.
    /// Otherwise a new version sharing all of `source_version`'s collections
    /// is allocated and snapshotted. The snapshot is never made current here.
    ///
    /// # Errors
    ///
    /// - `InvalidInput`: metadata has an inverted date range
    /// - `NotFound`: `source_version` was never committed
    /// - `StorageIo` / `CorruptionDetected`: forking the version failed
    pub fn create_snapshot(
        &self,
        dataset_id: &DatasetId,
        source_version: Version,
        metadata: SnapshotMetadata,
    ) -> Result<Snapshot> {
        let started = Instant::now();
        log_op_start!("create_snapshot", dataset_id = %dataset_id, source_version = source_version.get());

        let result = self.create_inner(dataset_id, source_version, metadata);
        let duration_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(snapshot) => log_op_end!(
                "create_snapshot",
                duration_ms = duration_ms,
                dataset_id = %dataset_id,
                version = snapshot.version().get()
            ),
            Err(e) => log_op_error!(
                "create_snapshot",
                *e,
                duration_ms = duration_ms,
                dataset_id = %dataset_id
            ),
        }
        result
    }

    /// Snapshot the dataset's committed head
    pub fn take_snapshot(&self, dataset_id: &DatasetId, metadata: SnapshotMetadata) -> Result<Snapshot> {
        let head = self.records.head_version(dataset_id)?.ok_or_else(|| {
            ExError::new(ExErrorKind::NotFound)
                .with_op("take_snapshot")
                .with_dataset_id(dataset_id.clone())
                .with_message("dataset has no committed versions")
        })?;
        self.create_snapshot(dataset_id, head, metadata)
    }

    fn create_inner(
        &self,
        dataset_id: &DatasetId,
        source_version: Version,
        metadata: SnapshotMetadata,
    ) -> Result<Snapshot> {
        metadata.validate()?;
        if !self.records.has_version(dataset_id, source_version)? {
            return Err(ExError::new(ExErrorKind::NotFound)
                .with_op("create_snapshot")
                .with_dataset_id(dataset_id.clone())
                .with_version(source_version)
                .with_message("source version was never committed"));
        }

        let pinned = SnapshotKey::new(dataset_id.clone(), source_version);
        {
            let conn = db::lock(&self.conn)?;
            if !query::snapshot_exists(&conn, &pinned)? {
                query::insert_snapshot(&conn, &pinned, &metadata, Utc::now())?;
                return fetch_required(&conn, &pinned, "create_snapshot");
            }
        }

        // Source already has a snapshot; the connection must be released
        // here because forking persists through it
        let version = self.records.fork_version(dataset_id, source_version)?;
        let key = SnapshotKey::new(dataset_id.clone(), version);
        let conn = db::lock(&self.conn)?;
        query::insert_snapshot(&conn, &key, &metadata, Utc::now())?;
        fetch_required(&conn, &key, "create_snapshot")
    }

    /// # Errors
    ///
    /// `NotFound` if no snapshot has this key
    pub fn get_snapshot(&self, key: &SnapshotKey) -> Result<Snapshot> {
        let conn = db::lock(&self.conn)?;
        fetch_required(&conn, key, "get_snapshot")
    }

    pub fn current_snapshot(&self, dataset_id: &DatasetId) -> Result<Option<Snapshot>> {
        let conn = db::lock(&self.conn)?;
        query::fetch_current(&conn, dataset_id)
    }

    /// All snapshots of a dataset in version order, fetched page by page
    pub fn list_snapshots(&self, dataset_id: &DatasetId) -> SnapshotIter {
        SnapshotIter {
            conn: self.conn.clone(),
            dataset_id: dataset_id.clone(),
            after: Version::ZERO,
            page_size: self.page_size,
            buffer: VecDeque::new(),
            done: false,
        }
    }

    /// Replace name, comment, date range and feed version reference
    pub fn update_metadata(&self, key: &SnapshotKey, metadata: SnapshotMetadata) -> Result<Snapshot> {
        metadata.validate()?;
        let conn = db::lock(&self.conn)?;
        if query::update_metadata(&conn, key, &metadata)? == 0 {
            return Err(not_found("update_metadata", key));
        }
        fetch_required(&conn, key, "update_metadata")
    }

    /// Retire a snapshot; the row stays for history
    ///
    /// # Errors
    ///
    /// `InvalidInput` if the snapshot is current; promote another one first
    pub fn mark_obsolete(&self, key: &SnapshotKey) -> Result<Snapshot> {
        let conn = db::lock(&self.conn)?;
        let snapshot = fetch_required(&conn, key, "mark_obsolete")?;
        if snapshot.current {
            return Err(ExError::new(ExErrorKind::InvalidInput)
                .with_op("mark_obsolete")
                .with_dataset_id(key.dataset_id.clone())
                .with_version(key.version)
                .with_message("the current snapshot cannot be marked obsolete"));
        }
        query::set_obsolete(&conn, key)?;
        tracing::info!(dataset_id = %key.dataset_id, version = key.version.get(), "Snapshot marked obsolete");
        fetch_required(&conn, key, "mark_obsolete")
    }

    /// Make `key` the dataset's current snapshot
    ///
    /// Clearing the previous current flag and setting the new one happen in
    /// one SQLite transaction, so no reader sees zero or two current
    /// snapshots.
    ///
    /// # Errors
    ///
    /// - `NotFound`: no such snapshot
    /// - `SnapshotObsolete`: the snapshot was retired
    pub fn promote(&self, key: &SnapshotKey) -> Result<Snapshot> {
        let started = Instant::now();
        log_op_start!("promote", dataset_id = %key.dataset_id, version = key.version.get());

        let result = self.promote_inner(key);
        let duration_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => log_op_end!(
                "promote",
                duration_ms = duration_ms,
                dataset_id = %key.dataset_id,
                version = key.version.get()
            ),
            Err(e) => log_op_error!(
                "promote",
                *e,
                duration_ms = duration_ms,
                dataset_id = %key.dataset_id
            ),
        }
        result
    }

    fn promote_inner(&self, key: &SnapshotKey) -> Result<Snapshot> {
        let mut conn = db::lock(&self.conn)?;
        let tx = conn.transaction().map_err(from_rusqlite)?;

        let snapshot = fetch_required(&tx, key, "promote")?;
        if snapshot.obsolete {
            return Err(obsolete("promote", key));
        }
        if snapshot.current {
            return Ok(snapshot);
        }

        query::clear_current(&tx, &key.dataset_id, key.version)?;
        query::set_current(&tx, key)?;
        let promoted = fetch_required(&tx, key, "promote")?;
        tx.commit().map_err(from_rusqlite)?;
        Ok(promoted)
    }

    /// Open a write transaction seeded with the snapshot's entity state
    ///
    /// Committing it makes that state the dataset's new head.
    ///
    /// # Errors
    ///
    /// - `NotFound`: no such snapshot
    /// - `SnapshotObsolete`: the snapshot was retired
    /// - `ConcurrentWriteConflict`: another writer holds the dataset
    pub fn restore(&self, key: &SnapshotKey) -> Result<WriteTx> {
        let snapshot = self.get_snapshot(key)?;
        if snapshot.obsolete {
            return Err(obsolete("restore", key));
        }
        let tx = self.records.open_write_from(&key.dataset_id, key.version)?;
        tracing::info!(dataset_id = %key.dataset_id, version = key.version.get(), "Restoring snapshot");
        Ok(tx)
    }

    /// Per-dataset count of current snapshots; every count is 1 when healthy
    pub fn current_counts(&self) -> Result<Vec<(DatasetId, usize)>> {
        let conn = db::lock(&self.conn)?;
        Ok(query::current_counts(&conn)?
            .into_iter()
            .map(|(ds, n)| (DatasetId::from(ds), n as usize))
            .collect())
    }
}

/// Lazily paged history of one dataset
pub struct SnapshotIter {
    conn: SharedConnection,
    dataset_id: DatasetId,
    after: Version,
    page_size: usize,
    buffer: VecDeque<Snapshot>,
    done: bool,
}

impl SnapshotIter {
    fn fill(&mut self) -> Result<()> {
        let conn = db::lock(&self.conn)?;
        let page = query::fetch_page(&conn, &self.dataset_id, self.after, self.page_size)?;
        if page.len() < self.page_size {
            self.done = true;
        }
        if let Some(last) = page.last() {
            self.after = last.version();
        }
        self.buffer.extend(page);
        Ok(())
    }
}

impl Iterator for SnapshotIter {
    type Item = Result<Snapshot>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.done {
            if let Err(e) = self.fill() {
                self.done = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

fn fetch_required(conn: &rusqlite::Connection, key: &SnapshotKey, op: &str) -> Result<Snapshot> {
    query::fetch_snapshot(conn, key)?.ok_or_else(|| not_found(op, key))
}

fn not_found(op: &str, key: &SnapshotKey) -> ExError {
    ExError::new(ExErrorKind::NotFound)
        .with_op(op)
        .with_dataset_id(key.dataset_id.clone())
        .with_version(key.version)
        .with_message(format!("snapshot {} not found", key))
}

fn obsolete(op: &str, key: &SnapshotKey) -> ExError {
    ExError::new(ExErrorKind::SnapshotObsolete)
        .with_op(op)
        .with_dataset_id(key.dataset_id.clone())
        .with_version(key.version)
        .with_message(format!("snapshot {} is obsolete", key))
}
