//! Batch import of records into a dataset

#![allow(clippy::result_large_err)]

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use transitx_core::errors::{ExError, ExErrorKind};
use transitx_core::model::SnapshotKey;
use transitx_core::store::{VersionedStore, WriteTx};
use transitx_core_types::{DatasetId, Version};

use crate::errors::{invalid_input, Result};
use crate::jobs::{JobContext, JobLogic};

/// Records to write, grouped by collection and keyed by record key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportBatch {
    collections: BTreeMap<String, BTreeMap<String, Value>>,
}

impl ImportBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, collection: impl Into<String>, key: impl Into<String>, record: Value) {
        self.collections
            .entry(collection.into())
            .or_default()
            .insert(key.into(), record);
    }

    /// Parse `{ "<collection>": <records> }`
    ///
    /// `<records>` is either an object keyed by record key or an array of
    /// objects that each carry a string `id`.
    pub fn from_json(value: Value) -> Result<Self> {
        let Value::Object(collections) = value else {
            return Err(invalid_input("parse_import", "import file must be a JSON object"));
        };

        let mut batch = Self::new();
        for (name, records) in collections {
            match records {
                Value::Object(entries) => {
                    for (key, record) in entries {
                        batch.insert(name.clone(), key, record);
                    }
                }
                Value::Array(items) => {
                    for (i, record) in items.into_iter().enumerate() {
                        let key = record
                            .get("id")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                            .ok_or_else(|| {
                                invalid_input(
                                    "parse_import",
                                    format!("{}[{}] has no string \"id\"", name, i),
                                )
                            })?;
                        batch.insert(name.clone(), key, record);
                    }
                }
                _ => {
                    return Err(invalid_input(
                        "parse_import",
                        format!("collection {} must be an object or an array", name),
                    ))
                }
            }
        }
        Ok(batch)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ExError::new(ExErrorKind::Io)
                .with_op("parse_import")
                .with_message(format!("cannot read {}: {}", path.display(), e))
        })?;
        let value: Value = serde_json::from_str(&text)
            .map_err(|e| invalid_input("parse_import", format!("{}: {}", path.display(), e)))?;
        Self::from_json(value)
    }

    pub fn collection_names(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }

    pub fn record_count(&self) -> usize {
        self.collections.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.record_count() == 0
    }
}

/// Writes a batch in one write transaction and commits it as a new version
pub struct ImportRecordsJob {
    store: Arc<VersionedStore>,
    dataset_id: DatasetId,
    batch: ImportBatch,
    replace: bool,
    expected_head: Option<Version>,
}

impl ImportRecordsJob {
    pub fn new(store: Arc<VersionedStore>, dataset_id: impl Into<DatasetId>, batch: ImportBatch) -> Self {
        Self {
            store,
            dataset_id: dataset_id.into(),
            batch,
            replace: false,
            expected_head: None,
        }
    }

    /// Empty each imported collection before writing
    pub fn replacing(mut self) -> Self {
        self.replace = true;
        self
    }

    /// Only write if the head is still `version`
    pub fn expecting_head(mut self, version: Version) -> Self {
        self.expected_head = Some(version);
        self
    }

    fn fill(&self, ctx: &JobContext, tx: &mut WriteTx) -> Result<()> {
        let total = self.batch.collections.len().max(1) as f64;
        for (i, (name, records)) in self.batch.collections.iter().enumerate() {
            ctx.checkpoint()?;
            let map = tx.get_map_mut(name);
            if self.replace {
                map.clear();
            }
            for (key, record) in records {
                map.insert(key.clone(), record.clone());
            }
            ctx.update(
                format!("Imported {} {}", records.len(), name),
                (i + 1) as f64 * 90.0 / total,
            );
        }
        Ok(())
    }
}

impl JobLogic for ImportRecordsJob {
    fn run(&mut self, ctx: &mut JobContext) -> Result<()> {
        ctx.update(format!("Importing into {}...", self.dataset_id), 0.0);
        let mut tx = match self.expected_head {
            Some(head) => self.store.open_write_expecting(&self.dataset_id, head)?,
            None => self.store.open_write(&self.dataset_id)?,
        };

        if let Err(e) = self.fill(ctx, &mut tx) {
            tx.rollback();
            return Err(e);
        }

        ctx.update("Committing...", 95.0);
        let outcome = tx.commit()?;
        ctx.set_completed_name(SnapshotKey::new(outcome.dataset_id, outcome.version).to_string());
        ctx.complete(format!(
            "Imported {} records into version {}",
            self.batch.record_count(),
            outcome.version
        ));
        Ok(())
    }
}
