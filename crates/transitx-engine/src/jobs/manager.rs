//! Job submission and the finish sequence

use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use transitx_core::errors::{ExError, ExErrorKind};
use transitx_core::model::Status;
use transitx_core::{log_op_end, log_op_error, log_op_start};
use transitx_core_types::{JobId, OwnerId};

use super::context::JobContext;
use super::executor::{JobExecutor, ThreadPerJob};
use super::job::{Job, JobEntry, JobLogic, JobState};
use super::job_type::JobType;
use super::registry::JobRegistry;
use crate::errors::{invalid_input, JobError, Result};

/// Whether follow-up jobs start after their parent failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainPolicy {
    /// Start every follow-up job regardless of outcome
    #[default]
    Always,
    /// Start follow-up jobs only after success; otherwise fail them as skipped
    OnSuccess,
}

/// Creates, submits and tracks jobs
///
/// Cheap to clone; clones share the registry and the executor.
#[derive(Clone)]
pub struct JobManager {
    registry: Arc<JobRegistry>,
    executor: Arc<dyn JobExecutor>,
    chain_policy: ChainPolicy,
}

impl JobManager {
    pub fn new(executor: Arc<dyn JobExecutor>, chain_policy: ChainPolicy) -> Self {
        Self {
            registry: Arc::new(JobRegistry::new()),
            executor,
            chain_policy,
        }
    }

    /// Thread per job, chains always run
    pub fn thread_per_job() -> Self {
        Self::new(Arc::new(ThreadPerJob), ChainPolicy::Always)
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn chain_policy(&self) -> ChainPolicy {
        self.chain_policy
    }

    /// Create a job and register it under `owner`
    ///
    /// # Errors
    ///
    /// `InvalidInput` if `owner` is blank
    pub fn create_job(
        &self,
        owner: OwnerId,
        name: impl Into<String>,
        job_type: JobType,
        logic: impl JobLogic,
    ) -> Result<Job> {
        if owner.is_blank() {
            return Err(invalid_input("create_job", "job owner must not be empty"));
        }
        let job = Job::create(
            self.registry.clone(),
            owner,
            name.into(),
            job_type,
            Box::new(logic),
        );
        tracing::debug!(
            job_id = %job.id(),
            owner = %job.owner(),
            job_type = %job.job_type(),
            "Job registered"
        );
        Ok(job)
    }

    /// Hand `job` to the executor
    ///
    /// # Errors
    ///
    /// `Internal` if the executor refused it; the job and its chain are then
    /// finished as failed and deregistered
    pub fn submit(&self, job: Job) -> Result<JobHandle> {
        let entry = job.entry.clone();
        let manager = self.clone();
        let label: String = entry.job_id().as_str().chars().take(8).collect();

        self.executor
            .submit(&label, Box::new(move || manager.run_job(job)))
            .map_err(|e| {
                // The task, and with it the job, was dropped
                ExError::from(JobError::Rejected {
                    job_id: entry.job_id().clone(),
                    reason: e.message().to_string(),
                })
            })?;
        Ok(JobHandle { entry })
    }

    pub fn jobs_for_owner(&self, owner: &OwnerId) -> Vec<Arc<JobEntry>> {
        self.registry.jobs_for_owner(owner)
    }

    pub fn cancel(&self, owner: &OwnerId, job_id: &JobId) -> Result<()> {
        self.registry.cancel(owner, job_id)
    }

    /// Block until no job is registered
    ///
    /// # Errors
    ///
    /// `Timeout` if jobs remain after `timeout`
    pub fn wait_idle(&self, timeout: Duration) -> Result<()> {
        if self.registry.wait_until_empty(timeout) {
            Ok(())
        } else {
            Err(JobError::WaitTimedOut {
                what: format!("{} active jobs", self.registry.active_count()),
                waited_ms: timeout.as_millis() as u64,
            }
            .into())
        }
    }

    fn run_job(&self, mut job: Job) {
        let entry = job.entry.clone();
        let Some(mut logic) = job.logic.take() else {
            return;
        };
        let started = Instant::now();
        entry.set_state(JobState::Running);
        log_op_start!(
            "job",
            job_id = %entry.job_id(),
            owner = %entry.owner(),
            job_type = %entry.job_type()
        );

        let mut ctx = JobContext::new(entry.clone(), self.clone());
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            ctx.checkpoint()?;
            logic.run(&mut ctx)
        }));
        let result = match outcome {
            Ok(result) => result,
            Err(payload) => Err(JobError::Panicked {
                job_id: entry.job_id().clone(),
                message: panic_message(payload.as_ref()),
            }
            .into()),
        };

        let succeeded = result.is_ok();
        if panic::catch_unwind(AssertUnwindSafe(|| logic.job_finished(&mut ctx, succeeded))).is_err() {
            tracing::warn!(job_id = %entry.job_id(), "job_finished hook panicked");
        }

        let status = settle_status(&entry, &result);
        let final_state = if status.is_error() {
            JobState::Failed
        } else {
            JobState::Completed
        };

        // Deregister before anyone waiting on the state is woken
        let mut chain = std::mem::take(&mut job.next_jobs);
        chain.append(&mut ctx.next_jobs);
        self.registry.remove(&entry);
        entry.set_state(final_state);

        let duration_ms = started.elapsed().as_millis() as u64;
        // The settled state decides the event; a job that completed and then
        // returned an error still completed
        match &result {
            _ if final_state == JobState::Completed => {
                if let Err(e) = &result {
                    tracing::warn!(
                        job_id = %entry.job_id(),
                        error = %e,
                        "Job returned an error after completing; status kept"
                    );
                }
                log_op_end!(
                    "job",
                    duration_ms = duration_ms,
                    job_id = %entry.job_id(),
                    owner = %entry.owner(),
                    job_type = %entry.job_type()
                )
            }
            Ok(()) => {
                let err = ExError::new(ExErrorKind::JobExecution)
                    .with_job_id(entry.job_id().clone())
                    .with_message(status.message().to_string());
                log_op_error!(
                    "job",
                    err,
                    duration_ms = duration_ms,
                    job_id = %entry.job_id(),
                    owner = %entry.owner(),
                    job_type = %entry.job_type()
                )
            }
            Err(e) => log_op_error!(
                "job",
                *e,
                duration_ms = duration_ms,
                job_id = %entry.job_id(),
                owner = %entry.owner(),
                job_type = %entry.job_type()
            ),
        }

        self.dispatch_chain(&entry, final_state, chain);
    }

    fn dispatch_chain(&self, parent: &JobEntry, parent_state: JobState, chain: Vec<Job>) {
        let run_chain = match self.chain_policy {
            ChainPolicy::Always => true,
            ChainPolicy::OnSuccess => parent_state == JobState::Completed,
        };

        for next in chain {
            if !run_chain {
                next.discard(&format!("Skipped: upstream job {} failed", parent.job_id()));
                continue;
            }
            let next_id = next.id().clone();
            if let Err(e) = self.submit(next) {
                tracing::error!(
                    job_id = %next_id,
                    upstream_job_id = %parent.job_id(),
                    error = %e,
                    "Could not start chained job"
                );
            }
        }
    }
}

impl std::fmt::Debug for JobManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobManager")
            .field("registry", &self.registry)
            .field("capacity", &self.executor.capacity())
            .field("chain_policy", &self.chain_policy)
            .finish()
    }
}

/// Turn whatever `run` left behind into a terminal status
fn settle_status(entry: &JobEntry, result: &Result<()>) -> Status {
    entry.status_handle().update(|status| {
        match result {
            Ok(()) => status.complete_successfully("Job complete!"),
            Err(e) => {
                let message = match e.kind() {
                    ExErrorKind::Cancelled => "Job cancelled".to_string(),
                    _ => format!("Job failed: {}", e.message()),
                };
                status.fail_with(message, e);
            }
        }
        status.clone()
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Caller's view of a submitted job
#[derive(Debug, Clone)]
pub struct JobHandle {
    entry: Arc<JobEntry>,
}

impl JobHandle {
    pub fn id(&self) -> &JobId {
        self.entry.job_id()
    }

    pub fn entry(&self) -> &Arc<JobEntry> {
        &self.entry
    }

    pub fn status(&self) -> Status {
        self.entry.status()
    }

    pub fn state(&self) -> JobState {
        self.entry.state()
    }

    /// Block until the job finishes and return its final status
    ///
    /// # Errors
    ///
    /// `Timeout` if the job is still running after `timeout`
    pub fn wait(&self, timeout: Duration) -> Result<Status> {
        if self.entry.wait_terminal(timeout) {
            Ok(self.entry.status())
        } else {
            Err(JobError::WaitTimedOut {
                what: format!("job {}", self.entry.job_id()),
                waited_ms: timeout.as_millis() as u64,
            }
            .into())
        }
    }

    pub fn cancel(&self) -> Result<()> {
        self.entry.request_cancel()
    }
}
