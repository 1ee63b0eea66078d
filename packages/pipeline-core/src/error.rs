use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Error taxonomy for the pipeline engine (spec §7).
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("unknown pipeline type: {0}")]
    UnknownPipelineType(String),

    #[error("pipeline not found: {0}")]
    NotFound(String),

    #[error("job not found: {job_name} (pipeline {pipeline_id})")]
    JobNotFound {
        pipeline_id: String,
        job_name: String,
    },

    #[error("invalid state for operation: {0}")]
    InvalidState(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("duplicate pipeline id: {0}")]
    DuplicatePipelineId(String),

    #[error("job {job_name} timed out after {minutes} minutes")]
    Timeout { job_name: String, minutes: u64 },

    #[error("storage error: {0}")]
    Storage(#[from] StorageErrorProxy),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Storage adapters live in `pipeline-storage`, which depends on
/// `pipeline-core` (not the reverse, so the engine stays ignorant of any
/// particular backend). Adapters convert their own error type into this
/// proxy before handing it back through the engine's `Result`.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct StorageErrorProxy(pub String);

impl StorageErrorProxy {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A single failed attempt at executing a job (spec §3, "Error Record").
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ErrorRecord {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ErrorRecord {
    pub fn new(message: impl Into<String>, attempt: u32) -> Self {
        Self {
            message: message.into(),
            stack: None,
            attempt,
            logs: None,
            data: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

/// Raised by a job's `execute` function. The engine catches this and
/// converts it into an `ErrorRecord`; it never reaches the pipeline's
/// caller directly.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct JobExecutionError {
    pub message: String,
    pub stack: Option<String>,
}

impl JobExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}
