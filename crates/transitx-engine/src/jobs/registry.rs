//! Process-wide owner → active jobs map

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use transitx_core_types::{JobId, OwnerId};

use super::job::JobEntry;
use crate::errors::{JobError, Result};

type OwnerJobs = HashMap<JobId, Arc<JobEntry>>;

/// Jobs currently registered, grouped by owner
///
/// An owner with no active jobs has no entry at all.
#[derive(Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<OwnerId, OwnerJobs>>,
    changed: Condvar,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, entry: Arc<JobEntry>) {
        let mut jobs = self.lock();
        jobs.entry(entry.owner().clone())
            .or_default()
            .insert(entry.job_id().clone(), entry);
        drop(jobs);
        self.changed.notify_all();
    }

    pub(crate) fn remove(&self, entry: &JobEntry) {
        let mut jobs = self.lock();
        if let Some(owned) = jobs.get_mut(entry.owner()) {
            owned.remove(entry.job_id());
            if owned.is_empty() {
                jobs.remove(entry.owner());
            }
        }
        drop(jobs);
        self.changed.notify_all();
    }

    /// Active jobs of `owner`; empty when the owner has none
    pub fn jobs_for_owner(&self, owner: &OwnerId) -> Vec<Arc<JobEntry>> {
        self.lock()
            .get(owner)
            .map(|owned| owned.values().cloned().collect())
            .unwrap_or_default()
    }

    /// # Errors
    ///
    /// `NotFound` if the job is not registered for `owner`
    pub fn job(&self, owner: &OwnerId, job_id: &JobId) -> Result<Arc<JobEntry>> {
        self.lock()
            .get(owner)
            .and_then(|owned| owned.get(job_id))
            .cloned()
            .ok_or_else(|| {
                JobError::UnknownJob {
                    owner: owner.to_string(),
                    job_id: job_id.clone(),
                }
                .into()
            })
    }

    pub fn all_jobs(&self) -> Vec<Arc<JobEntry>> {
        self.lock()
            .values()
            .flat_map(|owned| owned.values().cloned())
            .collect()
    }

    /// Owners with at least one active job
    pub fn owners(&self) -> Vec<OwnerId> {
        self.lock().keys().cloned().collect()
    }

    /// Ask a running or waiting job to stop at its next checkpoint
    ///
    /// # Errors
    ///
    /// - `NotFound`: not registered for `owner`
    /// - `JobAlreadyFinished`: reached a terminal state in the meantime
    pub fn cancel(&self, owner: &OwnerId, job_id: &JobId) -> Result<()> {
        let entry = self.job(owner, job_id)?;
        entry.request_cancel()?;
        tracing::info!(job_id = %job_id, owner = %owner, "Job cancellation requested");
        Ok(())
    }

    pub fn active_count(&self) -> usize {
        self.lock().values().map(|owned| owned.len()).sum()
    }

    /// Block until no job is registered; `false` on timeout
    pub fn wait_until_empty(&self, timeout: Duration) -> bool {
        let started = Instant::now();
        let mut jobs = self.lock();
        while !jobs.is_empty() {
            let waited = started.elapsed();
            if waited >= timeout {
                return false;
            }
            jobs = match self.changed.wait_timeout(jobs, timeout - waited) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }

    // Entries are only ever inserted or removed whole, so a poisoned map is
    // still consistent
    fn lock(&self) -> MutexGuard<'_, HashMap<OwnerId, OwnerJobs>> {
        match self.jobs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("active", &self.active_count())
            .finish()
    }
}
