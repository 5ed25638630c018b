pub mod dataset;
pub mod snapshot;

use std::time::Duration;
use transitx_core::errors::{ExError, ExErrorKind};
use transitx_core::Status;
use transitx_core_types::OwnerId;
use transitx_engine::{Engine, JobLogic, JobType};

use crate::GlobalArgs;

/// Submit `logic` as a job, wait for it, and print its final status as JSON
///
/// A failed job turns into an error so the process exits non-zero.
pub fn run_job(
    engine: &Engine,
    global: &GlobalArgs,
    name: &str,
    job_type: JobType,
    logic: impl JobLogic,
) -> Result<Status, ExError> {
    let job = engine
        .jobs()
        .create_job(OwnerId::from(global.owner.as_str()), name, job_type, logic)?;
    let handle = engine.jobs().submit(job)?;
    let status = handle.wait(Duration::from_secs(global.timeout_secs))?;

    print_json(&status)?;
    if status.is_error() {
        return Err(ExError::new(ExErrorKind::JobExecution)
            .with_job_id(handle.id().clone())
            .with_message(format!(
                "{} ({})",
                status.message(),
                status.exception_type().unwrap_or("unknown")
            )));
    }
    Ok(status)
}

pub fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<(), ExError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
