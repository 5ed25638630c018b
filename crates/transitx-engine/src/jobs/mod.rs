//! Job framework
//!
//! A job is created through the `JobManager`, which registers it under its
//! owner right away. Submitting hands it to a `JobExecutor`; when its logic
//! returns (or panics) the finish sequence settles the status, deregisters
//! the job and starts its chained follow-up jobs according to the
//! `ChainPolicy`.

pub mod context;
pub mod executor;
pub mod job;
pub mod job_type;
pub mod manager;
pub mod registry;

pub use context::JobContext;
pub use executor::{BoundedPool, JobExecutor, ThreadPerJob};
pub use job::{Job, JobEntry, JobLogic, JobState, JobSummary, StatusHandle};
pub use job_type::JobType;
pub use manager::{ChainPolicy, JobHandle, JobManager};
pub use registry::JobRegistry;
