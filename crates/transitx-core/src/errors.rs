use thiserror::Error;
use transitx_core_types::{DatasetId, JobId, Version};

/// Result type alias using ExError
pub type Result<T> = std::result::Result<T, ExError>;

// ========== Error Facility ==========

/// Canonical error kind taxonomy
///
/// Every failure raised by the record store, the snapshot registry or the job
/// framework is classified by one of these kinds. Each kind maps to a stable
/// error code used by callers, tests and status messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExErrorKind {
    // Storage
    /// Underlying persistent medium unavailable; fatal to the transaction
    StorageIo,
    /// Another writer holds the dataset, or the head moved; caller may retry
    ConcurrentWriteConflict,
    /// Stored data failed verification; the dataset refuses writes until cleared
    CorruptionDetected,

    // Jobs
    /// Uncaught failure inside a job's work
    JobExecution,
    /// Job observed its cancellation flag at a checkpoint
    Cancelled,
    /// Chain mutation attempted after the job finished
    JobAlreadyFinished,

    // Structural/Validation
    InvalidInput,
    NotFound,
    AlreadyExists,
    /// Snapshot was marked obsolete and can no longer be promoted or restored
    SnapshotObsolete,

    // Integration/IO
    Io,
    Serialization,
    Persistence,
    Timeout,

    // Internal
    Internal,
}

impl ExErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ExErrorKind::StorageIo => "ERR_STORAGE_IO",
            ExErrorKind::ConcurrentWriteConflict => "ERR_CONCURRENT_WRITE_CONFLICT",
            ExErrorKind::CorruptionDetected => "ERR_CORRUPTION_DETECTED",
            ExErrorKind::JobExecution => "ERR_JOB_EXECUTION",
            ExErrorKind::Cancelled => "ERR_CANCELLED",
            ExErrorKind::JobAlreadyFinished => "ERR_JOB_ALREADY_FINISHED",
            ExErrorKind::InvalidInput => "ERR_INVALID_INPUT",
            ExErrorKind::NotFound => "ERR_NOT_FOUND",
            ExErrorKind::AlreadyExists => "ERR_ALREADY_EXISTS",
            ExErrorKind::SnapshotObsolete => "ERR_SNAPSHOT_OBSOLETE",
            ExErrorKind::Io => "ERR_IO",
            ExErrorKind::Serialization => "ERR_SERIALIZATION",
            ExErrorKind::Persistence => "ERR_PERSISTENCE",
            ExErrorKind::Timeout => "ERR_TIMEOUT",
            ExErrorKind::Internal => "ERR_INTERNAL",
        }
    }

    /// Whether the caller may retry the failed operation unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExErrorKind::ConcurrentWriteConflict)
    }
}

/// Canonical structured error type
///
/// Carries a kind for programmatic handling plus dataset/version/job context
/// for operators reading logs or job statuses.
#[derive(Debug, Clone)]
pub struct ExError {
    kind: ExErrorKind,
    op: Option<String>,
    dataset_id: Option<DatasetId>,
    version: Option<Version>,
    job_id: Option<JobId>,
    message: String,
    source: Option<Box<ExError>>,
}

impl ExError {
    /// Create a new error with the specified kind
    pub fn new(kind: ExErrorKind) -> Self {
        Self {
            kind,
            op: None,
            dataset_id: None,
            version: None,
            job_id: None,
            message: String::new(),
            source: None,
        }
    }

    /// Add operation context
    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    /// Add dataset context
    pub fn with_dataset_id(mut self, id: impl Into<DatasetId>) -> Self {
        self.dataset_id = Some(id.into());
        self
    }

    /// Add version context
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    /// Add job context
    pub fn with_job_id(mut self, job_id: JobId) -> Self {
        self.job_id = Some(job_id);
        self
    }

    /// Add custom message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Add source error
    pub fn with_source(mut self, source: ExError) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Get the error kind
    pub fn kind(&self) -> ExErrorKind {
        self.kind
    }

    /// Get the stable error code
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Get the operation context, if any
    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    /// Get the dataset context, if any
    pub fn dataset_id(&self) -> Option<&DatasetId> {
        self.dataset_id.as_ref()
    }

    /// Get the version context, if any
    pub fn version(&self) -> Option<Version> {
        self.version
    }

    /// Get the job context, if any
    pub fn job_id(&self) -> Option<&JobId> {
        self.job_id.as_ref()
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the source error, if any
    pub fn source_error(&self) -> Option<&ExError> {
        self.source.as_deref()
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl std::fmt::Display for ExError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.code())?;
        if let Some(op) = &self.op {
            write!(f, " in operation '{}'", op)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(dataset_id) = &self.dataset_id {
            write!(f, " (dataset_id: {})", dataset_id)?;
        }
        if let Some(version) = self.version {
            write!(f, " (version: {})", version)?;
        }
        if let Some(job_id) = &self.job_id {
            write!(f, " (job_id: {})", job_id)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<serde_json::Error> for ExError {
    fn from(err: serde_json::Error) -> Self {
        ExError::new(ExErrorKind::Serialization).with_message(err.to_string())
    }
}

// ========== End Error Facility ==========

/// Failures raised by the in-memory record store
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordStoreError {
    /// Another write transaction is open on the dataset
    #[error("Dataset {dataset_id} already has an open write transaction")]
    WriterBusy { dataset_id: String },

    /// Waiting for the writer slot exceeded the configured timeout
    #[error("Timed out after {waited_ms}ms waiting for the writer of dataset {dataset_id}")]
    WriterWaitTimedOut { dataset_id: String, waited_ms: u64 },

    /// Optimistic head check failed
    #[error("Dataset {dataset_id} head is {actual}, expected {expected}")]
    HeadMoved {
        dataset_id: String,
        expected: u64,
        actual: u64,
    },

    /// Dataset is flagged corrupt and refuses writes
    #[error("Dataset {dataset_id} is flagged corrupt: {reason}")]
    Corrupted { dataset_id: String, reason: String },

    /// Requested version is not retained for the dataset
    #[error("Version {version} of dataset {dataset_id} does not exist")]
    UnknownVersion { dataset_id: String, version: u64 },

    /// Stored record could not be decoded into the requested type
    #[error("Record {collection}/{key} could not be decoded: {message}")]
    Decode {
        collection: String,
        key: String,
        message: String,
    },

    /// Value could not be encoded as a record
    #[error("Record {collection}/{key} could not be encoded: {message}")]
    Encode {
        collection: String,
        key: String,
        message: String,
    },

    /// A lock guarding dataset state was poisoned by a panicking thread
    #[error("Lock poisoned while accessing {what}")]
    LockPoisoned { what: String },
}

impl From<RecordStoreError> for ExError {
    fn from(err: RecordStoreError) -> Self {
        let message = err.to_string();
        match err {
            RecordStoreError::WriterBusy { dataset_id } => {
                ExError::new(ExErrorKind::ConcurrentWriteConflict)
                    .with_op("open_write")
                    .with_dataset_id(dataset_id)
                    .with_message(message)
            }
            RecordStoreError::WriterWaitTimedOut { dataset_id, .. } => {
                ExError::new(ExErrorKind::ConcurrentWriteConflict)
                    .with_op("open_write")
                    .with_dataset_id(dataset_id)
                    .with_message(message)
            }
            RecordStoreError::HeadMoved {
                dataset_id, actual, ..
            } => ExError::new(ExErrorKind::ConcurrentWriteConflict)
                .with_op("open_write")
                .with_dataset_id(dataset_id)
                .with_version(Version::new(actual))
                .with_message(message),
            RecordStoreError::Corrupted { dataset_id, .. } => {
                ExError::new(ExErrorKind::CorruptionDetected)
                    .with_dataset_id(dataset_id)
                    .with_message(message)
            }
            RecordStoreError::UnknownVersion {
                dataset_id,
                version,
            } => ExError::new(ExErrorKind::NotFound)
                .with_dataset_id(dataset_id)
                .with_version(Version::new(version))
                .with_message(message),
            RecordStoreError::Decode { .. } | RecordStoreError::Encode { .. } => {
                ExError::new(ExErrorKind::Serialization).with_message(message)
            }
            RecordStoreError::LockPoisoned { .. } => {
                ExError::new(ExErrorKind::Internal).with_message(message)
            }
        }
    }
}
