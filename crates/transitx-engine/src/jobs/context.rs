//! What a running job sees of the framework

use std::sync::Arc;
use transitx_core::errors::ExError;
use transitx_core::model::Status;
use transitx_core_types::{JobId, OwnerId};

use super::job::{Job, JobEntry, JobLogic};
use super::job_type::JobType;
use super::manager::JobManager;
use crate::errors::{JobError, Result};

pub struct JobContext {
    entry: Arc<JobEntry>,
    manager: JobManager,
    pub(crate) next_jobs: Vec<Job>,
}

impl JobContext {
    pub(crate) fn new(entry: Arc<JobEntry>, manager: JobManager) -> Self {
        Self {
            entry,
            manager,
            next_jobs: Vec::new(),
        }
    }

    pub fn job_id(&self) -> &JobId {
        self.entry.job_id()
    }

    pub fn owner(&self) -> &OwnerId {
        self.entry.owner()
    }

    pub fn job_type(&self) -> JobType {
        self.entry.job_type()
    }

    pub fn manager(&self) -> &JobManager {
        &self.manager
    }

    /// Copy of this job's status
    pub fn status(&self) -> Status {
        self.entry.status()
    }

    pub fn update(&self, message: impl Into<String>, percent_complete: f64) {
        self.entry
            .status_handle()
            .update(|s| s.update(message, percent_complete));
    }

    pub fn update_message(&self, message: impl Into<String>) {
        self.entry.status_handle().update(|s| s.update_message(message));
    }

    pub fn set_uploading(&self, uploading: bool) {
        self.entry.status_handle().update(|s| s.set_uploading(uploading));
    }

    pub fn set_completed_name(&self, name: impl Into<String>) {
        self.entry.status_handle().update(|s| s.set_completed_name(name));
    }

    /// Mark the job successful with a final message
    ///
    /// Without this the framework completes the status with a default
    /// message once `run` returns `Ok`.
    pub fn complete(&self, message: impl Into<String>) {
        self.entry
            .status_handle()
            .update(|s| s.complete_successfully(message));
    }

    /// Mark the job failed with a final message
    pub fn fail(&self, message: impl Into<String>, err: &ExError) {
        self.entry.status_handle().update(|s| s.fail_with(message, err));
    }

    pub fn is_cancelled(&self) -> bool {
        self.entry.is_cancel_requested()
    }

    /// Safe point for cooperative cancellation
    ///
    /// # Errors
    ///
    /// `Cancelled` once cancellation was requested
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(JobError::Cancelled {
                job_id: self.job_id().clone(),
            }
            .into());
        }
        Ok(())
    }

    /// Register a job under this job's owner, to be chained with `add_next_job`
    pub fn create_job(
        &self,
        name: impl Into<String>,
        job_type: JobType,
        logic: impl JobLogic,
    ) -> Result<Job> {
        self.manager
            .create_job(self.owner().clone(), name, job_type, logic)
    }

    /// Start `job` once this job finishes
    pub fn add_next_job(&mut self, job: Job) {
        self.next_jobs.push(job);
    }
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("entry", &self.entry)
            .field("next_jobs", &self.next_jobs.len())
            .finish()
    }
}
