//! Data directory layout
//!
//! ```text
//! <root>/
//!   transitx.db   snapshot registry and version index
//!   cas/          record and manifest blobs
//! ```

#![allow(clippy::result_large_err)]

use crate::cas::FsStore;
use crate::db;
use crate::errors::{io_error, Result};
use crate::migrations::apply_migrations;
use crate::records::SqliteVersionStorage;
use crate::snapshot::SnapshotRegistry;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use transitx_core::store::{VersionedStore, WriteConflictPolicy};

pub const DB_FILE: &str = "transitx.db";
pub const CAS_DIR: &str = "cas";

/// Record store and snapshot registry sharing one database
#[derive(Clone)]
pub struct DataDir {
    root: Option<PathBuf>,
    records: Arc<VersionedStore>,
    registry: Arc<SnapshotRegistry>,
}

impl DataDir {
    /// Open (creating if needed) a durable data directory
    pub fn open(root: impl AsRef<Path>, policy: WriteConflictPolicy) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join(CAS_DIR)).map_err(|e| io_error("open_data_dir", e))?;

        let mut conn = db::open(root.join(DB_FILE))?;
        db::configure(&conn)?;
        apply_migrations(&mut conn)?;
        let conn = db::share(conn);

        let storage = SqliteVersionStorage::new(conn.clone(), FsStore::new(root.join(CAS_DIR)));
        let records = Arc::new(VersionedStore::new(Arc::new(storage), policy));
        let registry = Arc::new(SnapshotRegistry::new(conn, records.clone()));

        tracing::info!(path = %root.display(), "Opened data directory");

        Ok(Self {
            root: Some(root),
            records,
            registry,
        })
    }

    /// Volatile variant: records live in memory, the registry in an
    /// in-memory SQLite database
    pub fn in_memory(policy: WriteConflictPolicy) -> Result<Self> {
        let mut conn = db::open_in_memory()?;
        db::configure(&conn)?;
        apply_migrations(&mut conn)?;

        let records = Arc::new(VersionedStore::in_memory(policy));
        let registry = Arc::new(SnapshotRegistry::new(db::share(conn), records.clone()));

        Ok(Self {
            root: None,
            records,
            registry,
        })
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn records(&self) -> &Arc<VersionedStore> {
        &self.records
    }

    pub fn registry(&self) -> &Arc<SnapshotRegistry> {
        &self.registry
    }
}

impl std::fmt::Debug for DataDir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataDir").field("root", &self.root).finish()
    }
}
