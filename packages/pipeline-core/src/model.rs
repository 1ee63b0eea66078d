//! Data model & types (spec §3): pipeline configuration, stage/job
//! definitions, synapse context, durable pipeline/job state, and error
//! records.

use crate::error::{ErrorRecord, JobExecutionError};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Opaque payload transported across the engine boundary (input, options,
/// artifact, error `data`). The core never introspects its shape.
pub type JsonValue = serde_json::Value;

/// Context passed to a job's `execute` function.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub pipeline_id: String,
    pub job_index: usize,
}

pub type ExecuteResult = std::result::Result<JsonValue, JobExecutionError>;

/// A job's pure(-ish) unit of work: `(input, options, context) -> artifact`.
pub type ExecuteFn =
    Arc<dyn Fn(JsonValue, JsonValue, JobContext) -> BoxFuture<'static, ExecuteResult> + Send + Sync>;

/// Read-only view a synapse sees: the original pipeline input plus a
/// lookup over artifacts already produced earlier in this execution.
/// A synapse may only look up jobs at a strictly smaller stage index than
/// its own; the engine enforces this by only populating `artifacts` with
/// jobs from completed earlier stages (and done siblings within the
/// current stage — see `SynapseContext::get_artifact`).
pub struct SynapseContext<'a> {
    pub pipeline_input: &'a JsonValue,
    artifacts: &'a HashMap<String, JsonValue>,
}

impl<'a> SynapseContext<'a> {
    pub fn new(pipeline_input: &'a JsonValue, artifacts: &'a HashMap<String, JsonValue>) -> Self {
        Self {
            pipeline_input,
            artifacts,
        }
    }

    pub fn get_artifact(&self, job_name: &str) -> Option<&JsonValue> {
        self.artifacts.get(job_name)
    }
}

/// A pure function computing a job's input from the synapse context.
pub type SynapseFn = Arc<dyn Fn(&SynapseContext) -> JsonValue + Send + Sync>;

/// A named unit of work. Unique within a pipeline.
pub struct JobDefinition {
    pub name: String,
    pub execute: ExecuteFn,
}

impl JobDefinition {
    pub fn new(name: impl Into<String>, execute: ExecuteFn) -> Self {
        Self {
            name: name.into(),
            execute,
        }
    }
}

impl fmt::Debug for JobDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDefinition").field("name", &self.name).finish()
    }
}

/// A job definition bundled with an optional synapse and retry policy.
#[derive(Clone)]
pub struct JobRef {
    pub job: Arc<JobDefinition>,
    pub synapse: Option<SynapseFn>,
    pub retries: u32,
    pub retry_delay_ms: u64,
}

impl JobRef {
    pub fn new(job: JobDefinition) -> Self {
        Self {
            job: Arc::new(job),
            synapse: None,
            retries: 0,
            retry_delay_ms: 1000,
        }
    }

    pub fn with_synapse(mut self, synapse: SynapseFn) -> Self {
        self.synapse = Some(synapse);
        self
    }

    pub fn with_retries(mut self, retries: u32, retry_delay_ms: u64) -> Self {
        self.retries = retries;
        self.retry_delay_ms = retry_delay_ms;
        self
    }

    pub fn name(&self) -> &str {
        &self.job.name
    }
}

impl fmt::Debug for JobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRef")
            .field("job", &self.job.name)
            .field("has_synapse", &self.synapse.is_some())
            .field("retries", &self.retries)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .finish()
    }
}

/// A stage as declared by a pipeline author: either a bare job definition,
/// a single job reference, or a parallel group of job references.
/// Normalized into a flat `(JobRef, stage_index)` list by `normalize`.
pub enum StageSpec {
    Job(JobDefinition),
    Single(JobRef),
    Group(Vec<JobRef>),
}

impl StageSpec {
    pub fn job(def: JobDefinition) -> Self {
        StageSpec::Job(def)
    }

    pub fn single(job_ref: JobRef) -> Self {
        StageSpec::Single(job_ref)
    }

    pub fn group(job_refs: Vec<JobRef>) -> Self {
        StageSpec::Group(job_refs)
    }
}

/// A pure function deriving `pipelineId` from the run input, letting
/// pipeline authors pick a memoization key narrower than the whole input.
pub type ComputeInputHashFn = Arc<dyn Fn(&JsonValue) -> String + Send + Sync>;

/// Immutable, in-process pipeline configuration (spec §3).
pub struct PipelineConfig {
    pub name: String,
    pub stages: Vec<StageSpec>,
    pub compute_input_hash: Option<ComputeInputHashFn>,
}

impl PipelineConfig {
    pub fn new(name: impl Into<String>, stages: Vec<StageSpec>) -> Self {
        Self {
            name: name.into(),
            stages,
            compute_input_hash: None,
        }
    }

    pub fn with_compute_input_hash(mut self, f: ComputeInputHashFn) -> Self {
        self.compute_input_hash = Some(f);
        self
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("name", &self.name)
            .field("stage_count", &self.stages.len())
            .finish()
    }
}

/// Durable per-job status (spec §3, "Job State").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
    Error,
}

/// Durable pipeline status (spec §3, invariants 3-5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Processing,
    Done,
    Error,
}

/// Durable state for one normalized job (spec §3, "Job State").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobState {
    pub name: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<JsonValue>,
    #[serde(default)]
    pub errors: Vec<ErrorRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub max_retries: u32,
}

impl JobState {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: JobStatus::Pending,
            input: None,
            options: None,
            artifact: None,
            errors: Vec::new(),
            started_at: None,
            finished_at: None,
            retry_count: 0,
            max_retries: 0,
        }
    }
}

/// Durable pipeline record, one per `pipelineId` (spec §3, "Pipeline State").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    pub pipeline_id: String,
    pub pipeline_type: String,
    pub status: PipelineStatus,
    pub current_job_index: usize,
    pub input: JsonValue,
    pub job_options: HashMap<String, JsonValue>,
    pub jobs: Vec<JobState>,
    pub config_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineState {
    /// Invariant 3-5 (spec §3): derive the would-be pipeline status purely
    /// from job statuses, for assertions and tests. The engine sets
    /// `status` explicitly rather than recomputing it on every read, but
    /// this stays true for any state the engine produces.
    pub fn recompute_status(&self) -> PipelineStatus {
        if self.jobs.iter().all(|j| j.status == JobStatus::Done) {
            PipelineStatus::Done
        } else if self.jobs.iter().any(|j| j.status == JobStatus::Error) {
            PipelineStatus::Error
        } else {
            PipelineStatus::Processing
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recompute_status_done_iff_all_jobs_done() {
        let mut state = sample_state();
        state.jobs[0].status = JobStatus::Done;
        state.jobs[1].status = JobStatus::Done;
        assert_eq!(state.recompute_status(), PipelineStatus::Done);
    }

    #[test]
    fn recompute_status_error_if_any_job_errored() {
        let mut state = sample_state();
        state.jobs[0].status = JobStatus::Done;
        state.jobs[1].status = JobStatus::Error;
        assert_eq!(state.recompute_status(), PipelineStatus::Error);
    }

    #[test]
    fn recompute_status_processing_otherwise() {
        let state = sample_state();
        assert_eq!(state.recompute_status(), PipelineStatus::Processing);
    }

    fn sample_state() -> PipelineState {
        PipelineState {
            pipeline_id: "abc".into(),
            pipeline_type: "demo".into(),
            status: PipelineStatus::Processing,
            current_job_index: 0,
            input: JsonValue::Null,
            job_options: HashMap::new(),
            jobs: vec![JobState::pending("a"), JobState::pending("b")],
            config_hash: "deadbeef".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}
