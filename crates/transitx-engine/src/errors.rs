//! Error handling for transitx-engine
//!
//! Job-framework failures as a `thiserror` enum, converted into the
//! canonical `ExError` at the crate boundary.

use thiserror::Error;
use transitx_core::errors::{ExError, ExErrorKind};
use transitx_core_types::JobId;

/// Result type alias using ExError
pub type Result<T> = std::result::Result<T, ExError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobError {
    /// Job logic panicked
    #[error("Job panicked: {message}")]
    Panicked { job_id: JobId, message: String },

    /// Job observed its cancellation flag at a checkpoint
    #[error("Job {job_id} was cancelled")]
    Cancelled { job_id: JobId },

    /// Cancellation requested for a job that already reached a terminal state
    #[error("Job {job_id} has already finished")]
    AlreadyFinished { job_id: JobId },

    /// No such job registered for the owner
    #[error("Job {job_id} is not registered for owner {owner}")]
    UnknownJob { owner: String, job_id: JobId },

    /// Executor refused the job
    #[error("Executor rejected job {job_id}: {reason}")]
    Rejected { job_id: JobId, reason: String },

    /// Waiting for a job or for the manager to go idle timed out
    #[error("Timed out after {waited_ms}ms waiting for {what}")]
    WaitTimedOut { what: String, waited_ms: u64 },

    /// A lock guarding job state was poisoned
    #[error("Lock poisoned while accessing {what}")]
    LockPoisoned { what: String },
}

impl From<JobError> for ExError {
    fn from(err: JobError) -> Self {
        let message = err.to_string();
        match err {
            JobError::Panicked { job_id, .. } => ExError::new(ExErrorKind::JobExecution)
                .with_op("run_job")
                .with_job_id(job_id)
                .with_message(message),
            JobError::Cancelled { job_id } => ExError::new(ExErrorKind::Cancelled)
                .with_op("checkpoint")
                .with_job_id(job_id)
                .with_message(message),
            JobError::AlreadyFinished { job_id } => ExError::new(ExErrorKind::JobAlreadyFinished)
                .with_op("cancel")
                .with_job_id(job_id)
                .with_message(message),
            JobError::UnknownJob { job_id, .. } => ExError::new(ExErrorKind::NotFound)
                .with_op("find_job")
                .with_job_id(job_id)
                .with_message(message),
            JobError::Rejected { job_id, .. } => ExError::new(ExErrorKind::Internal)
                .with_op("submit")
                .with_job_id(job_id)
                .with_message(message),
            JobError::WaitTimedOut { .. } => ExError::new(ExErrorKind::Timeout)
                .with_op("wait")
                .with_message(message),
            JobError::LockPoisoned { .. } => ExError::new(ExErrorKind::Internal)
                .with_op("job_lock")
                .with_message(message),
        }
    }
}

/// Create an invalid configuration error
pub fn config_error(message: impl Into<String>) -> ExError {
    ExError::new(ExErrorKind::InvalidInput)
        .with_op("load_config")
        .with_message(message)
}

/// Create an invalid job input error
pub fn invalid_input(op: &str, message: impl Into<String>) -> ExError {
    ExError::new(ExErrorKind::InvalidInput)
        .with_op(op.to_string())
        .with_message(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_errors_map_to_stable_kinds() {
        let id = JobId::new();
        let cases = [
            (JobError::Cancelled { job_id: id.clone() }, ExErrorKind::Cancelled),
            (
                JobError::AlreadyFinished { job_id: id.clone() },
                ExErrorKind::JobAlreadyFinished,
            ),
            (
                JobError::Panicked {
                    job_id: id.clone(),
                    message: "boom".into(),
                },
                ExErrorKind::JobExecution,
            ),
            (
                JobError::WaitTimedOut {
                    what: "job".into(),
                    waited_ms: 5,
                },
                ExErrorKind::Timeout,
            ),
        ];
        for (err, kind) in cases {
            let ex: ExError = err.into();
            assert_eq!(ex.kind(), kind);
        }
    }

    #[test]
    fn test_cancelled_carries_job_id() {
        let id = JobId::new();
        let ex: ExError = JobError::Cancelled { job_id: id.clone() }.into();
        assert_eq!(ex.job_id(), Some(&id));
    }
}
