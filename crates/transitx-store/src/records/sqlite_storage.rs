//! SQLite + CAS implementation of `VersionStorage`.
//!
//! Layout of one version:
//! - every record body is a CAS blob (canonical JSON)
//! - every collection is a CAS manifest blob mapping record key to digest
//! - `dataset_versions.collections_json` maps collection name to manifest digest
//!
//! Unchanged collections and records therefore cost nothing per version.

#![allow(clippy::result_large_err)]

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use transitx_core::errors::{ExError, ExErrorKind, RecordStoreError};
use transitx_core::store::{CollectionMap, DatasetImage, Record, VersionState, VersionStorage};
use transitx_core_types::{DatasetId, Version};

use crate::cas::FsStore;
use crate::db::{self, SharedConnection};
use crate::errors::{from_rusqlite, Result};

pub struct SqliteVersionStorage {
    conn: SharedConnection,
    cas: FsStore,
    /// Collections already in the CAS, keyed by allocation; the Weak keeps
    /// the address from being reused without keeping the collection alive
    persisted: Mutex<HashMap<usize, (Weak<CollectionMap>, String)>>,
    /// Records still held by some version, keyed by digest, so reloaded
    /// versions share them
    records: Mutex<HashMap<String, Weak<serde_json::Value>>>,
}

impl SqliteVersionStorage {
    pub fn new(conn: SharedConnection, cas: FsStore) -> Self {
        Self {
            conn,
            cas,
            persisted: Mutex::new(HashMap::new()),
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn cas(&self) -> &FsStore {
        &self.cas
    }

    fn persist_collection(&self, map: &Arc<CollectionMap>) -> Result<String> {
        let ptr = Arc::as_ptr(map) as usize;
        if let Some((cached, digest)) = lock_cache(&self.persisted)?.get(&ptr) {
            if cached.strong_count() > 0 {
                return Ok(digest.clone());
            }
        }

        let mut manifest = BTreeMap::new();
        for (key, record) in map.iter() {
            let body = serde_json::to_vec(record.as_ref())?;
            manifest.insert(key.to_string(), self.cas.write(&body, "json")?);
        }
        let digest = self.cas.write(&serde_json::to_vec(&manifest)?, "json")?;

        lock_cache(&self.persisted)?.insert(ptr, (Arc::downgrade(map), digest.clone()));
        Ok(digest)
    }

    fn load_collection(&self, dataset_id: &DatasetId, name: &str, manifest_digest: &str) -> Result<Arc<CollectionMap>> {
        let bytes = self
            .cas
            .read_verified(manifest_digest)
            .map_err(|e| blob_corruption(dataset_id, e))?;
        let manifest: BTreeMap<String, String> = serde_json::from_slice(&bytes).map_err(|e| {
            corruption(dataset_id, format!("manifest {} is unreadable: {}", manifest_digest, e))
        })?;

        let mut map = CollectionMap::new(name);
        for (key, digest) in manifest {
            let record = self.load_record(dataset_id, &digest)?;
            map.insert_record(key, record);
        }

        let map = Arc::new(map);
        lock_cache(&self.persisted)?.insert(
            Arc::as_ptr(&map) as usize,
            (Arc::downgrade(&map), manifest_digest.to_string()),
        );
        Ok(map)
    }

    fn load_record(&self, dataset_id: &DatasetId, digest: &str) -> Result<Record> {
        if let Some(record) = lock_cache(&self.records)?.get(digest).and_then(Weak::upgrade) {
            return Ok(record);
        }
        let bytes = self
            .cas
            .read_verified(digest)
            .map_err(|e| blob_corruption(dataset_id, e))?;
        let value: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| corruption(dataset_id, format!("record {} is unreadable: {}", digest, e)))?;
        let record = Arc::new(value);
        lock_cache(&self.records)?.insert(digest.to_string(), Arc::downgrade(&record));
        Ok(record)
    }

    /// Forget cache entries whose versions are all gone
    fn prune_caches(&self) -> Result<()> {
        lock_cache(&self.persisted)?.retain(|_, (map, _)| map.strong_count() > 0);
        lock_cache(&self.records)?.retain(|_, record| record.strong_count() > 0);
        Ok(())
    }

    /// Number of live collection and record cache entries
    #[cfg(test)]
    fn cached_entries(&self) -> Result<(usize, usize)> {
        Ok((lock_cache(&self.persisted)?.len(), lock_cache(&self.records)?.len()))
    }
}

impl VersionStorage for SqliteVersionStorage {
    fn load_dataset(&self, dataset_id: &DatasetId) -> Result<Option<DatasetImage>> {
        let (head, next_version, corrupted, versions) = {
            let conn = db::lock(&self.conn)?;
            let row: Option<(Option<i64>, i64, Option<String>)> = conn
                .query_row(
                    "SELECT head_version, next_version, corrupted FROM dataset_heads WHERE dataset_id = ?1",
                    [dataset_id.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()
                .map_err(from_rusqlite)?;
            let Some((head, next_version, corrupted)) = row else {
                return Ok(None);
            };

            let mut stmt = conn
                .prepare("SELECT version FROM dataset_versions WHERE dataset_id = ?1 ORDER BY version")
                .map_err(from_rusqlite)?;
            let versions = stmt
                .query_map([dataset_id.as_str()], |row| row.get::<_, i64>(0))
                .map_err(from_rusqlite)?
                .map(|v| v.map(|v| Version::new(v as u64)))
                .collect::<std::result::Result<BTreeSet<_>, _>>()
                .map_err(from_rusqlite)?;
            (head, next_version, corrupted, versions)
        };

        let head = match head {
            Some(v) => Some(self.load_version(dataset_id, Version::new(v as u64))?),
            None => None,
        };

        tracing::debug!(
            dataset_id = %dataset_id,
            versions = versions.len(),
            corrupted = corrupted.is_some(),
            "Loaded dataset from storage"
        );

        Ok(Some(DatasetImage {
            head,
            next_version: Version::new(next_version as u64),
            versions,
            corrupted,
        }))
    }

    fn load_version(&self, dataset_id: &DatasetId, version: Version) -> Result<VersionState> {
        let row: Option<(Option<i64>, String, i64)> = {
            let conn = db::lock(&self.conn)?;
            conn.query_row(
                "SELECT base_version, collections_json, committed_at
                 FROM dataset_versions WHERE dataset_id = ?1 AND version = ?2",
                rusqlite::params![dataset_id.as_str(), version.get() as i64],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(from_rusqlite)?
        };
        let (base_version, collections_json, committed_at) = row.ok_or_else(|| {
            ExError::from(RecordStoreError::UnknownVersion {
                dataset_id: dataset_id.to_string(),
                version: version.get(),
            })
        })?;

        let manifests: BTreeMap<String, String> = serde_json::from_str(&collections_json)
            .map_err(|e| corruption(dataset_id, format!("version {} index is unreadable: {}", version, e)))?;

        let mut collections = BTreeMap::new();
        for (name, digest) in manifests {
            let map = self.load_collection(dataset_id, &name, &digest)?;
            collections.insert(name, map);
        }

        let committed_at = DateTime::<Utc>::from_timestamp_millis(committed_at)
            .ok_or_else(|| corruption(dataset_id, format!("version {} has an invalid commit time", version)))?;
        self.prune_caches()?;

        Ok(VersionState::new(
            version,
            base_version.map(|v| Version::new(v as u64)),
            collections,
            committed_at,
        ))
    }

    fn persist_version(
        &self,
        dataset_id: &DatasetId,
        state: &VersionState,
        next_version: Version,
        publish_head: bool,
    ) -> Result<()> {
        let mut manifests = BTreeMap::new();
        for (name, map) in state.collections() {
            manifests.insert(name.clone(), self.persist_collection(map)?);
        }
        let collections_json = serde_json::to_string(&manifests)?;
        let version = state.version().get() as i64;

        let mut conn = db::lock(&self.conn)?;
        let tx = conn.transaction().map_err(from_rusqlite)?;
        tx.execute(
            "INSERT INTO dataset_versions (dataset_id, version, base_version, collections_json, committed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                dataset_id.as_str(),
                version,
                state.base_version().map(|v| v.get() as i64),
                collections_json,
                state.committed_at().timestamp_millis(),
            ],
        )
        .map_err(from_rusqlite)?;
        // Counter and head only ever move forward, whatever order
        // concurrent allocations persist in
        tx.execute(
            "INSERT INTO dataset_heads (dataset_id, head_version, next_version, corrupted)
             VALUES (?1, ?2, ?3, NULL)
             ON CONFLICT(dataset_id) DO UPDATE SET
                 next_version = MAX(dataset_heads.next_version, excluded.next_version),
                 head_version = CASE
                     WHEN ?4 = 1 AND (dataset_heads.head_version IS NULL
                                      OR excluded.head_version > dataset_heads.head_version)
                     THEN excluded.head_version
                     ELSE dataset_heads.head_version
                 END",
            rusqlite::params![
                dataset_id.as_str(),
                if publish_head { Some(version) } else { None },
                next_version.get() as i64,
                publish_head as i64,
            ],
        )
        .map_err(from_rusqlite)?;
        tx.commit().map_err(from_rusqlite)?;
        drop(conn);
        self.prune_caches()?;

        tracing::debug!(
            dataset_id = %dataset_id,
            version = version,
            collections = manifests.len(),
            publish_head = publish_head,
            "Persisted version"
        );
        Ok(())
    }

    fn mark_corrupt(&self, dataset_id: &DatasetId, reason: Option<&str>) -> Result<()> {
        let conn = db::lock(&self.conn)?;
        conn.execute(
            "INSERT INTO dataset_heads (dataset_id, head_version, next_version, corrupted)
             VALUES (?1, NULL, 1, ?2)
             ON CONFLICT(dataset_id) DO UPDATE SET corrupted = excluded.corrupted",
            rusqlite::params![dataset_id.as_str(), reason],
        )
        .map_err(from_rusqlite)?;
        Ok(())
    }
}

fn lock_cache<T>(cache: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    cache.lock().map_err(|_| {
        ExError::from(RecordStoreError::LockPoisoned {
            what: "record storage cache".to_string(),
        })
    })
}

fn corruption(dataset_id: &DatasetId, message: String) -> ExError {
    ExError::new(ExErrorKind::CorruptionDetected)
        .with_op("load_version")
        .with_dataset_id(dataset_id.clone())
        .with_message(message)
}

/// A blob the index points at is missing or fails verification
fn blob_corruption(dataset_id: &DatasetId, err: ExError) -> ExError {
    match err.kind() {
        ExErrorKind::NotFound | ExErrorKind::CorruptionDetected => {
            corruption(dataset_id, err.message().to_string())
        }
        _ => err,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup(dir: &TempDir) -> SqliteVersionStorage {
        let mut conn = db::open(dir.path().join("transitx.db")).unwrap();
        crate::migrations::apply_migrations(&mut conn).unwrap();
        SqliteVersionStorage::new(db::share(conn), FsStore::new(dir.path().join("cas")))
    }

    fn state(version: u64, routes: &[&str]) -> VersionState {
        let mut map = CollectionMap::new("routes");
        for r in routes {
            map.insert(*r, json!({ "id": r }));
        }
        let mut collections = BTreeMap::new();
        collections.insert("routes".to_string(), Arc::new(map));
        VersionState::new(Version::new(version), None, collections, Utc::now())
    }

    #[test]
    fn test_unknown_dataset_loads_as_none() {
        let dir = TempDir::new().unwrap();
        let storage = setup(&dir);
        assert!(storage.load_dataset(&DatasetId::from("BART")).unwrap().is_none());
    }

    #[test]
    fn test_persist_then_load() {
        let dir = TempDir::new().unwrap();
        let storage = setup(&dir);
        let bart = DatasetId::from("BART");

        storage
            .persist_version(&bart, &state(1, &["R1", "R2"]), Version::new(2), true)
            .unwrap();

        let image = storage.load_dataset(&bart).unwrap().unwrap();
        assert_eq!(image.next_version, Version::new(2));
        let head = image.head.unwrap();
        assert_eq!(head.version(), Version::new(1));
        assert_eq!(head.collection("routes").unwrap().len(), 2);
        assert!(image.corrupted.is_none());
    }

    #[test]
    fn test_counter_never_moves_backwards() {
        let dir = TempDir::new().unwrap();
        let storage = setup(&dir);
        let bart = DatasetId::from("BART");

        storage.persist_version(&bart, &state(2, &["R1"]), Version::new(3), false).unwrap();
        storage.persist_version(&bart, &state(1, &["R1"]), Version::new(2), true).unwrap();

        let image = storage.load_dataset(&bart).unwrap().unwrap();
        assert_eq!(image.next_version, Version::new(3));
        assert_eq!(image.head.unwrap().version(), Version::new(1));
        assert_eq!(image.versions.len(), 2);
    }

    #[test]
    fn test_caches_forget_dropped_versions() {
        let dir = TempDir::new().unwrap();
        let storage = setup(&dir);
        let bart = DatasetId::from("BART");

        let first = state(1, &["R1", "R2"]);
        storage.persist_version(&bart, &first, Version::new(2), true).unwrap();
        drop(first);
        let second = state(2, &["R3"]);
        storage.persist_version(&bart, &second, Version::new(3), true).unwrap();
        assert_eq!(storage.cached_entries().unwrap(), (1, 0));
        drop(second);

        let head = storage.load_dataset(&bart).unwrap().unwrap().head.unwrap();
        assert_eq!(storage.cached_entries().unwrap(), (1, 1));
        drop(head);

        let old = storage.load_version(&bart, Version::new(1)).unwrap();
        assert_eq!(old.collection("routes").unwrap().len(), 2);
        assert_eq!(storage.cached_entries().unwrap(), (1, 2));
    }

    #[test]
    fn test_corruption_flag_round_trip() {
        let dir = TempDir::new().unwrap();
        let storage = setup(&dir);
        let bart = DatasetId::from("BART");

        storage.mark_corrupt(&bart, Some("bad manifest")).unwrap();
        let image = storage.load_dataset(&bart).unwrap().unwrap();
        assert_eq!(image.corrupted.as_deref(), Some("bad manifest"));
        assert!(image.head.is_none());

        storage.mark_corrupt(&bart, None).unwrap();
        assert!(storage.load_dataset(&bart).unwrap().unwrap().corrupted.is_none());
    }
}
