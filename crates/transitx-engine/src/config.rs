//! Engine configuration
//!
//! Loaded from a TOML file; every field has a default, so an empty file is a
//! valid configuration.
//!
//! ```toml
//! data_dir = "/var/lib/transitx"
//! write_conflict = { block = { timeout_ms = 500 } }
//! executor = { bounded = { workers = 4 } }
//! chain_policy = "on_success"
//! log_profile = "production"
//! ```

#![allow(clippy::result_large_err)]

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use transitx_core::errors::{ExError, ExErrorKind};
use transitx_core::logging_facility::Profile;
use transitx_core::store::WriteConflictPolicy;

use crate::errors::{config_error, Result};
use crate::jobs::{BoundedPool, ChainPolicy, JobExecutor, ThreadPerJob};

/// Global engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Directory holding the SQLite database and the CAS; in memory when unset.
    pub data_dir: Option<PathBuf>,
    /// What a second concurrent writer on a dataset experiences.
    pub write_conflict: WriteConflictConfig,
    /// How jobs are scheduled.
    pub executor: ExecutorConfig,
    /// Whether chained jobs run after a failed parent.
    pub chain_policy: ChainPolicy,
    pub log_profile: LogProfile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WriteConflictConfig {
    #[default]
    Fail,
    Block { timeout_ms: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorConfig {
    /// One thread per job (unbounded fan-out).
    #[default]
    ThreadPerJob,
    /// Fixed worker pool.
    Bounded { workers: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogProfile {
    #[default]
    Development,
    Production,
}

impl EngineConfig {
    /// Read and validate a TOML configuration file
    ///
    /// # Errors
    ///
    /// - `Io`: the file cannot be read
    /// - `InvalidInput`: it is not valid TOML or fails validation
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ExError::new(ExErrorKind::Io)
                .with_op("load_config")
                .with_message(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "Loaded engine configuration");
        Ok(config)
    }

    /// # Errors
    ///
    /// `InvalidInput` if `text` is not a valid configuration
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| config_error(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if let ExecutorConfig::Bounded { workers: 0 } = self.executor {
            return Err(config_error("executor.bounded.workers must be at least 1"));
        }
        if let WriteConflictConfig::Block { timeout_ms: 0 } = self.write_conflict {
            return Err(config_error("write_conflict.block.timeout_ms must be positive"));
        }
        Ok(())
    }

    pub fn write_conflict_policy(&self) -> WriteConflictPolicy {
        match self.write_conflict {
            WriteConflictConfig::Fail => WriteConflictPolicy::Fail,
            WriteConflictConfig::Block { timeout_ms } => WriteConflictPolicy::Block {
                timeout: Duration::from_millis(timeout_ms),
            },
        }
    }

    pub fn build_executor(&self) -> Result<Arc<dyn JobExecutor>> {
        Ok(match self.executor {
            ExecutorConfig::ThreadPerJob => Arc::new(ThreadPerJob),
            ExecutorConfig::Bounded { workers } => Arc::new(BoundedPool::new(workers)?),
        })
    }

    pub fn logging_profile(&self) -> Profile {
        match self.log_profile {
            LogProfile::Development => Profile::Development,
            LogProfile::Production => Profile::Production,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_all_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.write_conflict_policy(), WriteConflictPolicy::Fail);
        assert_eq!(config.chain_policy, ChainPolicy::Always);
        assert_eq!(config.executor, ExecutorConfig::ThreadPerJob);
    }

    #[test]
    fn test_full_file() {
        let config = EngineConfig::from_toml_str(
            r#"
            data_dir = "/tmp/transitx"
            write_conflict = { block = { timeout_ms = 250 } }
            executor = { bounded = { workers = 3 } }
            chain_policy = "on_success"
            log_profile = "production"
            "#,
        )
        .unwrap();

        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/transitx")));
        assert_eq!(
            config.write_conflict_policy(),
            WriteConflictPolicy::Block {
                timeout: Duration::from_millis(250)
            }
        );
        assert_eq!(config.executor, ExecutorConfig::Bounded { workers: 3 });
        assert_eq!(config.chain_policy, ChainPolicy::OnSuccess);
        assert_eq!(config.logging_profile(), Profile::Production);
    }

    #[test]
    fn test_unknown_key_is_invalid_input() {
        let err = EngineConfig::from_toml_str("threads = 4").unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::InvalidInput);
    }

    #[test]
    fn test_zero_workers_is_invalid_input() {
        let err = EngineConfig::from_toml_str("executor = { bounded = { workers = 0 } }").unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::InvalidInput);
    }

    #[test]
    fn test_unknown_chain_policy_is_invalid_input() {
        let err = EngineConfig::from_toml_str("chain_policy = \"sometimes\"").unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::InvalidInput);
    }
}
