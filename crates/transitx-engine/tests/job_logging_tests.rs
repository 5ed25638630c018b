#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;
use transitx_core::core_types::OwnerId;
use transitx_core::logging_facility::test_capture::init_test_capture;
use transitx_core::{ExError, ExErrorKind};
use transitx_engine::{JobContext, JobLogic, JobManager, JobState, JobType, Result};

struct Finishes;

impl JobLogic for Finishes {
    fn run(&mut self, _ctx: &mut JobContext) -> Result<()> {
        Ok(())
    }
}

struct Broken;

impl JobLogic for Broken {
    fn run(&mut self, _ctx: &mut JobContext) -> Result<()> {
        Err(ExError::new(ExErrorKind::StorageIo).with_message("disk gone"))
    }
}

struct CompletesThenErrs;

impl JobLogic for CompletesThenErrs {
    fn run(&mut self, ctx: &mut JobContext) -> Result<()> {
        ctx.complete("done early");
        Err(ExError::new(ExErrorKind::StorageIo).with_message("cleanup failed"))
    }
}

#[test]
fn test_job_boundaries_are_logged() {
    let capture = init_test_capture();
    let manager = JobManager::thread_per_job();
    let job = manager
        .create_job(OwnerId::from("logger"), "fine", JobType::ValidateFeed, Finishes)
        .unwrap();
    let id = job.id().to_string();
    manager
        .submit(job)
        .unwrap()
        .wait(Duration::from_secs(10))
        .unwrap();

    let events = capture.events_with("job_id", &id);
    let phases: Vec<_> = events
        .iter()
        .filter(|e| e.op.as_deref() == Some("job"))
        .filter_map(|e| e.event.clone())
        .collect();
    assert_eq!(phases, vec!["start".to_string(), "end".to_string()]);
    let end = events.iter().find(|e| e.event.as_deref() == Some("end")).unwrap();
    assert_eq!(end.field("job_type"), Some("VALIDATE_FEED"));
    assert!(end.field("duration_ms").is_some());
}

#[test]
fn test_failed_job_logs_error_code() {
    let capture = init_test_capture();
    let manager = JobManager::thread_per_job();
    let job = manager
        .create_job(OwnerId::from("logger"), "broken", JobType::ImportRecords, Broken)
        .unwrap();
    let id = job.id().to_string();
    manager
        .submit(job)
        .unwrap()
        .wait(Duration::from_secs(10))
        .unwrap();

    let error = capture
        .events_with("job_id", &id)
        .into_iter()
        .find(|e| e.event.as_deref() == Some("end_error"))
        .expect("error event");
    assert_eq!(error.field("err_code"), Some("ERR_STORAGE_IO"));
}

#[test]
fn test_error_after_completion_logs_success() {
    let capture = init_test_capture();
    let manager = JobManager::thread_per_job();
    let job = manager
        .create_job(OwnerId::from("logger"), "late error", JobType::ImportRecords, CompletesThenErrs)
        .unwrap();
    let id = job.id().to_string();
    let handle = manager.submit(job).unwrap();
    let status = handle.wait(Duration::from_secs(10)).unwrap();

    assert!(!status.is_error());
    assert_eq!(status.message(), "done early");
    assert_eq!(handle.state(), JobState::Completed);

    let phases: Vec<_> = capture
        .events_with("job_id", &id)
        .into_iter()
        .filter(|e| e.op.as_deref() == Some("job"))
        .filter_map(|e| e.event)
        .collect();
    assert_eq!(phases, vec!["start".to_string(), "end".to_string()]);
}
