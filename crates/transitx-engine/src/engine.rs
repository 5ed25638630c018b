//! Engine facade: data directory plus job manager, built from configuration

#![allow(clippy::result_large_err)]

use std::sync::Arc;
use transitx_core::store::VersionedStore;
use transitx_store::{DataDir, SnapshotRegistry};

use crate::config::EngineConfig;
use crate::errors::Result;
use crate::jobs::JobManager;

#[derive(Debug, Clone)]
pub struct Engine {
    config: EngineConfig,
    data: DataDir,
    jobs: JobManager,
}

impl Engine {
    /// Open the configured data directory (or an in-memory one) and start
    /// the configured executor
    pub fn open(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let policy = config.write_conflict_policy();
        let data = match &config.data_dir {
            Some(dir) => DataDir::open(dir, policy)?,
            None => DataDir::in_memory(policy)?,
        };
        let jobs = JobManager::new(config.build_executor()?, config.chain_policy);

        tracing::info!(
            data_dir = ?config.data_dir,
            executor = ?config.executor,
            chain_policy = ?config.chain_policy,
            "Engine ready"
        );
        Ok(Self { config, data, jobs })
    }

    pub fn in_memory() -> Result<Self> {
        Self::open(EngineConfig::default())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn data(&self) -> &DataDir {
        &self.data
    }

    pub fn records(&self) -> &Arc<VersionedStore> {
        self.data.records()
    }

    pub fn registry(&self) -> &Arc<SnapshotRegistry> {
        self.data.registry()
    }

    pub fn jobs(&self) -> &JobManager {
        &self.jobs
    }
}
