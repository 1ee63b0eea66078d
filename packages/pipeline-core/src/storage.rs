//! Storage contract (spec §4.6): the engine, restart coordinator, watchdog,
//! and query API all talk to durable state exclusively through this trait.
//! Implementations live in `pipeline-storage`; this crate only depends on
//! the contract, never a concrete backend.

use crate::error::Result;
use crate::model::{ErrorRecord, JobStatus, JsonValue, PipelineState, PipelineStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// A page of results, newest-first by `createdAt` (spec §4.6).
#[derive(Debug, Clone)]
pub struct PagedResult<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u32,
}

#[derive(Debug, Clone, Default)]
pub struct FindAllParams {
    pub page: u32,
    pub limit: u32,
    pub pipeline_type: Option<String>,
}

/// Parameters for a restart's partial reset (spec §4.4 step 5).
#[derive(Debug, Clone, Default)]
pub struct ResetJobsParams {
    pub pipeline_id: String,
    pub reset_job_indices: Vec<usize>,
    pub job_options: Option<HashMap<String, JsonValue>>,
}

/// Abstract CRUD + targeted mutators over pipeline state (spec §4.6). Every
/// method is expected to be atomic at the granularity of a single call; the
/// engine never wraps more than one call in a transaction.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<PipelineState>>;

    async fn find_all(&self, params: FindAllParams) -> Result<PagedResult<PipelineState>>;

    /// Insert a new record, stamping `createdAt`/`updatedAt`. Fails with
    /// `PipelineError::DuplicatePipelineId` if the id already exists.
    async fn create(&self, state: PipelineState) -> Result<PipelineState>;

    async fn delete(&self, id: &str) -> Result<bool>;

    async fn update_status(&self, id: &str, status: PipelineStatus) -> Result<()>;

    /// Transition a job's status; also sets `currentJobIndex = job_index`.
    async fn update_job_status(
        &self,
        id: &str,
        job_index: usize,
        status: JobStatus,
        started_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Success terminal: sets job status `done`.
    async fn update_job_artifact(
        &self,
        id: &str,
        job_index: usize,
        artifact: JsonValue,
        finished_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Append to `errors`; if `is_final`, also sets status `error` and
    /// `finishedAt`.
    async fn append_job_error(
        &self,
        id: &str,
        job_index: usize,
        error: ErrorRecord,
        is_final: bool,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    async fn update_current_job_index(&self, id: &str, job_index: usize) -> Result<()>;

    async fn update_job_input(
        &self,
        id: &str,
        job_index: usize,
        input: JsonValue,
        options: Option<JsonValue>,
    ) -> Result<()>;

    async fn update_job_retry_count(
        &self,
        id: &str,
        job_index: usize,
        retry_count: u32,
        max_retries: u32,
    ) -> Result<()>;

    /// Scan for stuck work (spec §4.7); returns the count of jobs reclaimed.
    async fn find_and_timeout_stale_jobs(&self, timeout_ms: i64) -> Result<u64>;

    /// Partial reset for restart (spec §4.4); atomic over all indicated
    /// jobs and pipeline pointers.
    async fn reset_jobs(&self, params: ResetJobsParams) -> Result<()>;
}
