//! Job identity, status and lifecycle state

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};
use transitx_core::model::Status;
use transitx_core_types::{JobId, OwnerId};

use super::context::JobContext;
use super::job_type::JobType;
use super::registry::JobRegistry;
use crate::errors::{JobError, Result};

/// Work performed by a job
///
/// Implementations keep the status current through the context and return
/// an error rather than leaving the status non-terminal; the framework turns
/// errors and panics into a failed status.
pub trait JobLogic: Send + 'static {
    fn run(&mut self, ctx: &mut JobContext) -> Result<()>;

    /// Final step after `run`, whatever its outcome
    fn job_finished(&mut self, _ctx: &mut JobContext, _succeeded: bool) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Created,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// Shared status of one job
///
/// Readers only ever get a clone, never a reference into the live value.
#[derive(Clone)]
pub struct StatusHandle(Arc<RwLock<Status>>);

impl StatusHandle {
    fn new(status: Status) -> Self {
        Self(Arc::new(RwLock::new(status)))
    }

    pub fn snapshot(&self) -> Status {
        match self.0.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut Status) -> R) -> R {
        let mut guard = match self.0.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

/// Registered, shareable part of a job
pub struct JobEntry {
    job_id: JobId,
    owner: OwnerId,
    name: String,
    job_type: JobType,
    status: StatusHandle,
    cancel_requested: AtomicBool,
    state: Mutex<JobState>,
    state_changed: Condvar,
}

impl JobEntry {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    /// Consistent copy of the current status
    pub fn status(&self) -> Status {
        self.status.snapshot()
    }

    pub(crate) fn status_handle(&self) -> &StatusHandle {
        &self.status
    }

    pub fn state(&self) -> JobState {
        *self.lock_state()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    pub(crate) fn request_cancel(&self) -> Result<()> {
        if self.state().is_terminal() {
            return Err(JobError::AlreadyFinished {
                job_id: self.job_id.clone(),
            }
            .into());
        }
        self.cancel_requested.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub(crate) fn set_state(&self, state: JobState) {
        *self.lock_state() = state;
        self.state_changed.notify_all();
    }

    /// Block until the job is terminal; `false` on timeout
    pub(crate) fn wait_terminal(&self, timeout: Duration) -> bool {
        let started = Instant::now();
        let mut state = self.lock_state();
        while !state.is_terminal() {
            let waited = started.elapsed();
            if waited >= timeout {
                return false;
            }
            state = match self.state_changed.wait_timeout(state, timeout - waited) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            job_id: self.job_id.clone(),
            owner: self.owner.clone(),
            name: self.name.clone(),
            job_type: self.job_type,
            state: self.state(),
            status: self.status(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, JobState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl std::fmt::Debug for JobEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobEntry")
            .field("job_id", &self.job_id)
            .field("owner", &self.owner)
            .field("name", &self.name)
            .field("job_type", &self.job_type)
            .field("state", &self.state())
            .finish()
    }
}

/// Serializable view of a job for status polling
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub job_id: JobId,
    pub owner: OwnerId,
    pub name: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub state: JobState,
    pub status: Status,
}

/// A registered job that has not been started yet
///
/// Owns its logic and its chain of follow-up jobs. Submitting it hands both
/// to the executor; dropping it unsubmitted deregisters it.
pub struct Job {
    pub(crate) entry: Arc<JobEntry>,
    pub(crate) logic: Option<Box<dyn JobLogic>>,
    pub(crate) next_jobs: Vec<Job>,
    registry: Arc<JobRegistry>,
}

impl Job {
    pub(crate) fn create(
        registry: Arc<JobRegistry>,
        owner: OwnerId,
        name: String,
        job_type: JobType,
        logic: Box<dyn JobLogic>,
    ) -> Self {
        let entry = Arc::new(JobEntry {
            job_id: JobId::new(),
            owner,
            status: StatusHandle::new(Status::new(name.clone())),
            name,
            job_type,
            cancel_requested: AtomicBool::new(false),
            state: Mutex::new(JobState::Created),
            state_changed: Condvar::new(),
        });
        registry.insert(entry.clone());
        Self {
            entry,
            logic: Some(logic),
            next_jobs: Vec::new(),
            registry,
        }
    }

    pub fn id(&self) -> &JobId {
        self.entry.job_id()
    }

    pub fn owner(&self) -> &OwnerId {
        self.entry.owner()
    }

    pub fn name(&self) -> &str {
        self.entry.name()
    }

    pub fn job_type(&self) -> JobType {
        self.entry.job_type()
    }

    pub fn status(&self) -> Status {
        self.entry.status()
    }

    pub fn entry(&self) -> &Arc<JobEntry> {
        &self.entry
    }

    /// Start `job` once this one finishes
    pub fn add_next_job(&mut self, job: Job) {
        self.next_jobs.push(job);
    }

    pub fn with_next_job(mut self, job: Job) -> Self {
        self.add_next_job(job);
        self
    }

    /// Finish without running: fail the status, deregister, and do the same
    /// for the whole chain below
    pub(crate) fn discard(mut self, reason: &str) {
        self.logic = None;
        let chain = std::mem::take(&mut self.next_jobs);
        self.finish_unrun(reason);
        let upstream = self.entry.job_id.clone();
        for next in chain {
            next.discard(&format!("Skipped: upstream job {} failed", upstream));
        }
    }

    fn finish_unrun(&self, reason: &str) {
        if self.entry.state() != JobState::Created {
            return;
        }
        self.entry.status.update(|s| s.fail(reason));
        self.registry.remove(&self.entry);
        self.entry.set_state(JobState::Failed);
        tracing::info!(
            job_id = %self.entry.job_id,
            owner = %self.entry.owner,
            job_type = %self.entry.job_type,
            reason = reason,
            "Job finished without running"
        );
    }
}

impl Drop for Job {
    fn drop(&mut self) {
        self.finish_unrun("Discarded before it started");
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("entry", &self.entry)
            .field("next_jobs", &self.next_jobs.len())
            .finish()
    }
}
