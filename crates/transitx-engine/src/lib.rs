//! TransitX Engine - Job orchestration layer
//!
//! Provides:
//! - Job framework: `Job`, `JobContext`, `JobRegistry`, `JobManager`
//! - Pluggable executors (thread per job, bounded worker pool)
//! - Built-in jobs over the record store and snapshot registry
//! - Engine configuration loaded from TOML

pub mod commands;
pub mod config;
pub mod engine;
pub mod errors;
pub mod jobs;

pub use config::EngineConfig;
pub use engine::Engine;
pub use errors::Result;
pub use jobs::{
    ChainPolicy, Job, JobContext, JobHandle, JobLogic, JobManager, JobRegistry, JobState, JobType,
};
