use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ExError;

/// Progress record of a job
///
/// A `Status` is owned by exactly one job while it runs. Other threads never
/// see the live value; they receive clones taken under the job's status lock,
/// so every observed value is fully formed.
///
/// Invariants kept by the mutators:
/// - `modified >= initialized`
/// - `completed` is set exactly once, together with `error` on failure
/// - once completed, further progress updates are ignored
/// - `percent_complete` stays within `0.0..=100.0`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    message: String,
    completed: bool,
    error: bool,
    uploading: bool,
    name: String,
    percent_complete: f64,
    initialized: DateTime<Utc>,
    modified: DateTime<Utc>,
    completed_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exception_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exception_details: Option<String>,
}

impl Status {
    /// Create a fresh status for a job called `name`
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            message: "Waiting to begin job...".to_string(),
            completed: false,
            error: false,
            uploading: false,
            name: name.into(),
            percent_complete: 0.0,
            initialized: now,
            modified: now,
            completed_name: None,
            exception_type: None,
            exception_details: None,
        }
    }

    /// Set message and progress
    ///
    /// Ignored once the status is terminal. Non-finite percentages leave the
    /// previous value in place.
    pub fn update(&mut self, message: impl Into<String>, percent_complete: f64) {
        if self.completed {
            return;
        }
        self.message = message.into();
        if percent_complete.is_finite() {
            self.percent_complete = percent_complete.clamp(0.0, 100.0);
        }
        self.touch();
    }

    /// Set the message without touching progress
    pub fn update_message(&mut self, message: impl Into<String>) {
        if self.completed {
            return;
        }
        self.message = message.into();
        self.touch();
    }

    pub fn set_uploading(&mut self, uploading: bool) {
        if self.completed {
            return;
        }
        self.uploading = uploading;
        self.touch();
    }

    /// Record the name of the artifact the job produced
    pub fn set_completed_name(&mut self, completed_name: impl Into<String>) {
        if self.completed {
            return;
        }
        self.completed_name = Some(completed_name.into());
        self.touch();
    }

    /// Terminal success: progress jumps to 100
    pub fn complete_successfully(&mut self, message: impl Into<String>) {
        if self.completed {
            return;
        }
        self.message = message.into();
        self.completed = true;
        self.error = false;
        self.uploading = false;
        self.percent_complete = 100.0;
        self.touch();
    }

    /// Terminal failure with a plain message; progress is left where it was
    pub fn fail(&mut self, message: impl Into<String>) {
        if self.completed {
            return;
        }
        self.message = message.into();
        self.completed = true;
        self.error = true;
        self.uploading = false;
        self.touch();
    }

    /// Terminal failure caused by an error
    pub fn fail_with(&mut self, message: impl Into<String>, err: &ExError) {
        if self.completed {
            return;
        }
        self.exception_type = Some(err.code().to_string());
        self.exception_details = Some(err.to_string());
        self.fail(message);
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn is_error(&self) -> bool {
        self.error
    }

    /// True when completed without error
    pub fn succeeded(&self) -> bool {
        self.completed && !self.error
    }

    pub fn is_uploading(&self) -> bool {
        self.uploading
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn percent_complete(&self) -> f64 {
        self.percent_complete
    }

    pub fn initialized(&self) -> DateTime<Utc> {
        self.initialized
    }

    pub fn modified(&self) -> DateTime<Utc> {
        self.modified
    }

    pub fn completed_name(&self) -> Option<&str> {
        self.completed_name.as_deref()
    }

    /// Stable error code of the failure, if the job failed with an error
    pub fn exception_type(&self) -> Option<&str> {
        self.exception_type.as_deref()
    }

    pub fn exception_details(&self) -> Option<&str> {
        self.exception_details.as_deref()
    }

    fn touch(&mut self) {
        // Wall clock can step backwards; never record a modification before creation
        self.modified = Utc::now().max(self.initialized);
    }
}
