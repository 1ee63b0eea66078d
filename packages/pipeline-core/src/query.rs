//! Query API (spec §4.8): status projection grouped by stage, result-by-job
//! lookup, and raw state for administrative use.

use crate::engine::Engine;
use crate::error::{ErrorRecord, PipelineError, Result};
use crate::model::{JobState, JobStatus, JsonValue, PipelineState, PipelineStatus};
use crate::storage::{FindAllParams, PagedResult};
use serde::Serialize;

/// One job's projection within a `StatusResponse`, annotated with the
/// stage index the registered config places it in.
#[derive(Debug, Clone, Serialize)]
pub struct StatusJob {
    pub name: String,
    pub stage_index: usize,
    pub status: JobStatus,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub errors: Vec<ErrorRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusError {
    pub message: String,
    pub job_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub pipeline_id: String,
    pub status: PipelineStatus,
    pub current_job_name: Option<String>,
    pub jobs: Vec<StatusJob>,
    pub error: Option<StatusError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultResponse {
    pub pipeline_id: String,
    pub job_name: String,
    pub status: JobStatus,
    /// `None` until the job reaches `done`; a job that completes with no
    /// artifact is represented as `Some(JsonValue::Null)`, distinct from
    /// "not finished yet".
    pub artifact: Option<JsonValue>,
}

impl Engine {
    /// `getStatus` (spec §4.8).
    pub async fn get_status(&self, pipeline_id: &str) -> Result<StatusResponse> {
        let state = self
            .storage()
            .find_by_id(pipeline_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(pipeline_id.to_string()))?;

        let config = self.registry().lookup(&state.pipeline_type)?;

        let jobs: Vec<StatusJob> = state
            .jobs
            .iter()
            .enumerate()
            .map(|(idx, job)| {
                let stage_index = config.stage_index_of_job_index(idx).unwrap_or(0);
                to_status_job(job, stage_index)
            })
            .collect();

        let current_job_name = state
            .jobs
            .get(state.current_job_index)
            .map(|j| j.name.clone());

        let error = if state.status == PipelineStatus::Error {
            state
                .jobs
                .iter()
                .find(|j| j.status == JobStatus::Error)
                .and_then(|j| j.errors.last().map(|e| StatusError {
                    message: e.message.clone(),
                    job_name: j.name.clone(),
                }))
        } else {
            None
        };

        Ok(StatusResponse {
            pipeline_id: state.pipeline_id,
            status: state.status,
            current_job_name,
            jobs,
            error,
        })
    }

    /// `getResult` (spec §4.8). Defaults to the last job in the flat list
    /// when `job_name` is omitted.
    pub async fn get_result(
        &self,
        pipeline_id: &str,
        job_name: Option<&str>,
    ) -> Result<ResultResponse> {
        let state = self
            .storage()
            .find_by_id(pipeline_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(pipeline_id.to_string()))?;

        let job = match job_name {
            Some(name) => state
                .jobs
                .iter()
                .find(|j| j.name == name)
                .ok_or_else(|| PipelineError::JobNotFound {
                    pipeline_id: pipeline_id.to_string(),
                    job_name: name.to_string(),
                })?,
            None => state
                .jobs
                .last()
                .ok_or_else(|| PipelineError::InvalidState("pipeline has no jobs".to_string()))?,
        };

        Ok(ResultResponse {
            pipeline_id: state.pipeline_id.clone(),
            job_name: job.name.clone(),
            status: job.status,
            artifact: if job.status == JobStatus::Done {
                Some(job.artifact.clone().unwrap_or(JsonValue::Null))
            } else {
                None
            },
        })
    }

    /// `getPipeline` (spec §4.8): raw state for administrative/debug use.
    pub async fn get_pipeline(&self, pipeline_id: &str) -> Result<Option<PipelineState>> {
        self.storage().find_by_id(pipeline_id).await
    }

    /// `findAll` (spec §4.6), scoped to one pipeline type by the HTTP
    /// adapter's own route.
    pub async fn list_pipelines(
        &self,
        pipeline_type: Option<String>,
        page: u32,
        limit: u32,
    ) -> Result<PagedResult<PipelineState>> {
        self.storage()
            .find_all(FindAllParams {
                page,
                limit,
                pipeline_type,
            })
            .await
    }
}

fn to_status_job(job: &JobState, stage_index: usize) -> StatusJob {
    StatusJob {
        name: job.name.clone(),
        stage_index,
        status: job.status,
        started_at: job.started_at,
        finished_at: job.finished_at,
        retry_count: job.retry_count,
        max_retries: job.max_retries,
        errors: job.errors.clone(),
    }
}
