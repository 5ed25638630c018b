//! Snapshot jobs: create, promote, restore

#![allow(clippy::result_large_err)]

use std::sync::Arc;
use transitx_core::model::{SnapshotKey, SnapshotMetadata};
use transitx_core_types::{DatasetId, Version};
use transitx_store::SnapshotRegistry;

use crate::errors::Result;
use crate::jobs::{JobContext, JobLogic};

/// Snapshot a dataset version (the head unless one is given)
pub struct CreateSnapshotJob {
    registry: Arc<SnapshotRegistry>,
    dataset_id: DatasetId,
    source_version: Option<Version>,
    metadata: SnapshotMetadata,
    promote: bool,
}

impl CreateSnapshotJob {
    pub fn new(
        registry: Arc<SnapshotRegistry>,
        dataset_id: impl Into<DatasetId>,
        metadata: SnapshotMetadata,
    ) -> Self {
        Self {
            registry,
            dataset_id: dataset_id.into(),
            source_version: None,
            metadata,
            promote: false,
        }
    }

    pub fn from_version(mut self, version: Version) -> Self {
        self.source_version = Some(version);
        self
    }

    /// Make the new snapshot current once created
    pub fn and_promote(mut self) -> Self {
        self.promote = true;
        self
    }
}

impl JobLogic for CreateSnapshotJob {
    fn run(&mut self, ctx: &mut JobContext) -> Result<()> {
        ctx.update("Initializing...", 0.0);
        ctx.checkpoint()?;

        ctx.update("Creating snapshot...", 20.0);
        let metadata = self.metadata.clone();
        let snapshot = match self.source_version {
            Some(version) => self
                .registry
                .create_snapshot(&self.dataset_id, version, metadata)?,
            None => self.registry.take_snapshot(&self.dataset_id, metadata)?,
        };
        ctx.update("Database snapshot finished.", 80.0);

        if self.promote {
            ctx.checkpoint()?;
            ctx.update("Promoting snapshot...", 90.0);
            self.registry.promote(&snapshot.key)?;
        }

        ctx.set_completed_name(snapshot.key.to_string());
        ctx.complete("Created snapshot!");
        Ok(())
    }
}

/// Make a snapshot the current one of its dataset
pub struct PromoteSnapshotJob {
    registry: Arc<SnapshotRegistry>,
    key: SnapshotKey,
}

impl PromoteSnapshotJob {
    pub fn new(registry: Arc<SnapshotRegistry>, key: SnapshotKey) -> Self {
        Self { registry, key }
    }
}

impl JobLogic for PromoteSnapshotJob {
    fn run(&mut self, ctx: &mut JobContext) -> Result<()> {
        ctx.update(format!("Promoting snapshot {}...", self.key), 10.0);
        let snapshot = self.registry.promote(&self.key)?;
        ctx.set_completed_name(snapshot.key.to_string());
        ctx.complete(format!("Snapshot {} is now current", snapshot.key));
        Ok(())
    }
}

/// Roll a dataset back to a snapshot
///
/// Restores the snapshot's entities as a new head version, snapshots that
/// version and promotes it, so the restored state becomes current.
pub struct RestoreSnapshotJob {
    registry: Arc<SnapshotRegistry>,
    key: SnapshotKey,
    metadata: Option<SnapshotMetadata>,
}

impl RestoreSnapshotJob {
    pub fn new(registry: Arc<SnapshotRegistry>, key: SnapshotKey) -> Self {
        Self {
            registry,
            key,
            metadata: None,
        }
    }

    /// Metadata for the snapshot of the restored version
    pub fn with_metadata(mut self, metadata: SnapshotMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

impl JobLogic for RestoreSnapshotJob {
    fn run(&mut self, ctx: &mut JobContext) -> Result<()> {
        ctx.update(format!("Restoring snapshot {}...", self.key), 10.0);
        let source = self.registry.get_snapshot(&self.key)?;
        let tx = self.registry.restore(&self.key)?;
        if let Err(e) = ctx.checkpoint() {
            tx.rollback();
            return Err(e);
        }
        let outcome = tx.commit()?;
        ctx.update("Restored entities committed.", 50.0);

        let metadata = self.metadata.clone().unwrap_or_else(|| {
            let mut metadata = source.metadata.clone();
            metadata.name = format!("Restore of {}", source.metadata.name);
            metadata.comment = Some(format!("Restored from snapshot {}", self.key));
            metadata
        });
        let snapshot = self
            .registry
            .create_snapshot(&outcome.dataset_id, outcome.version, metadata)?;

        ctx.update("Promoting restored snapshot...", 80.0);
        self.registry.promote(&snapshot.key)?;

        ctx.set_completed_name(snapshot.key.to_string());
        ctx.complete("Restored snapshot!");
        Ok(())
    }
}
