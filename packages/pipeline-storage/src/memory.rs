//! Ephemeral in-memory `Storage` implementation. A conforming example of
//! the storage contract (spec §4.6), useful for tests and for hosts that
//! don't need durability across restarts.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use pipeline_core::error::{ErrorRecord, PipelineError, Result};
use pipeline_core::model::{JobStatus, JsonValue, PipelineState, PipelineStatus};
use pipeline_core::storage::{FindAllParams, PagedResult, ResetJobsParams, Storage};
use std::collections::HashMap;

/// Backed by a single `parking_lot::Mutex` guarding a `HashMap`, the same
/// shape the engine's in-process registry uses for its own locking.
#[derive(Default)]
pub struct InMemoryStorage {
    records: Mutex<HashMap<String, PipelineState>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn job_error(id: &str, state: &PipelineState, job_index: usize) -> PipelineError {
    let job_name = state
        .jobs
        .get(job_index)
        .map(|j| j.name.clone())
        .unwrap_or_else(|| job_index.to_string());
    PipelineError::JobNotFound {
        pipeline_id: id.to_string(),
        job_name,
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn find_by_id(&self, id: &str) -> Result<Option<PipelineState>> {
        Ok(self.records.lock().get(id).cloned())
    }

    async fn find_all(&self, params: FindAllParams) -> Result<PagedResult<PipelineState>> {
        let records = self.records.lock();
        let mut items: Vec<PipelineState> = records
            .values()
            .filter(|s| {
                params
                    .pipeline_type
                    .as_deref()
                    .map_or(true, |t| s.pipeline_type == t)
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = items.len() as u64;
        let limit = params.limit.max(1);
        let page = params.page.max(1);
        let total_pages = ((total as f64) / f64::from(limit)).ceil() as u32;
        let start = ((page - 1) as usize) * (limit as usize);
        let page_items = items.into_iter().skip(start).take(limit as usize).collect();

        Ok(PagedResult {
            items: page_items,
            total,
            page,
            limit,
            total_pages,
        })
    }

    async fn create(&self, mut state: PipelineState) -> Result<PipelineState> {
        let mut records = self.records.lock();
        if records.contains_key(&state.pipeline_id) {
            return Err(PipelineError::DuplicatePipelineId(state.pipeline_id));
        }
        let now = Utc::now();
        state.created_at = now;
        state.updated_at = now;
        records.insert(state.pipeline_id.clone(), state.clone());
        Ok(state)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.records.lock().remove(id).is_some())
    }

    async fn update_status(&self, id: &str, status: PipelineStatus) -> Result<()> {
        let mut records = self.records.lock();
        let state = records
            .get_mut(id)
            .ok_or_else(|| PipelineError::NotFound(id.to_string()))?;
        state.status = status;
        state.updated_at = Utc::now();
        Ok(())
    }

    async fn update_job_status(
        &self,
        id: &str,
        job_index: usize,
        status: JobStatus,
        started_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut records = self.records.lock();
        let state = records
            .get_mut(id)
            .ok_or_else(|| PipelineError::NotFound(id.to_string()))?;
        state.current_job_index = job_index;
        let job = state
            .jobs
            .get_mut(job_index)
            .ok_or_else(|| PipelineError::JobNotFound {
                pipeline_id: id.to_string(),
                job_name: job_index.to_string(),
            })?;
        job.status = status;
        if let Some(ts) = started_at {
            job.started_at = Some(ts);
        }
        state.updated_at = Utc::now();
        Ok(())
    }

    async fn update_job_artifact(
        &self,
        id: &str,
        job_index: usize,
        artifact: JsonValue,
        finished_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut records = self.records.lock();
        let state = records
            .get_mut(id)
            .ok_or_else(|| PipelineError::NotFound(id.to_string()))?;
        let job = state
            .jobs
            .get_mut(job_index)
            .ok_or_else(|| PipelineError::JobNotFound {
                pipeline_id: id.to_string(),
                job_name: job_index.to_string(),
            })?;
        job.status = JobStatus::Done;
        job.artifact = Some(artifact);
        job.finished_at = Some(finished_at);
        state.updated_at = Utc::now();
        Ok(())
    }

    async fn append_job_error(
        &self,
        id: &str,
        job_index: usize,
        error: ErrorRecord,
        is_final: bool,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut records = self.records.lock();
        let state = records
            .get_mut(id)
            .ok_or_else(|| PipelineError::NotFound(id.to_string()))?;
        {
            let job = state
                .jobs
                .get_mut(job_index)
                .ok_or_else(|| PipelineError::JobNotFound {
                    pipeline_id: id.to_string(),
                    job_name: job_index.to_string(),
                })?;
            job.errors.push(error);
            if is_final {
                job.status = JobStatus::Error;
                job.finished_at = finished_at;
            }
        }
        if is_final {
            state.status = PipelineStatus::Error;
        }
        state.updated_at = Utc::now();
        Ok(())
    }

    async fn update_current_job_index(&self, id: &str, job_index: usize) -> Result<()> {
        let mut records = self.records.lock();
        let state = records
            .get_mut(id)
            .ok_or_else(|| PipelineError::NotFound(id.to_string()))?;
        state.current_job_index = job_index;
        state.updated_at = Utc::now();
        Ok(())
    }

    async fn update_job_input(
        &self,
        id: &str,
        job_index: usize,
        input: JsonValue,
        options: Option<JsonValue>,
    ) -> Result<()> {
        let mut records = self.records.lock();
        let state = records
            .get_mut(id)
            .ok_or_else(|| PipelineError::NotFound(id.to_string()))?;
        let job = state
            .jobs
            .get_mut(job_index)
            .ok_or_else(|| PipelineError::JobNotFound {
                pipeline_id: id.to_string(),
                job_name: job_index.to_string(),
            })?;
        job.input = Some(input);
        job.options = options;
        state.updated_at = Utc::now();
        Ok(())
    }

    async fn update_job_retry_count(
        &self,
        id: &str,
        job_index: usize,
        retry_count: u32,
        max_retries: u32,
    ) -> Result<()> {
        let mut records = self.records.lock();
        let state = records
            .get_mut(id)
            .ok_or_else(|| PipelineError::NotFound(id.to_string()))?;
        let job = state
            .jobs
            .get_mut(job_index)
            .ok_or_else(|| PipelineError::JobNotFound {
                pipeline_id: id.to_string(),
                job_name: job_index.to_string(),
            })?;
        job.retry_count = retry_count;
        job.max_retries = max_retries;
        state.updated_at = Utc::now();
        Ok(())
    }

    async fn find_and_timeout_stale_jobs(&self, timeout_ms: i64) -> Result<u64> {
        let mut records = self.records.lock();
        let cutoff = Utc::now() - ChronoDuration::milliseconds(timeout_ms);
        let mut reclaimed = 0u64;

        for state in records.values_mut() {
            if state.status != PipelineStatus::Processing {
                continue;
            }
            let mut any_reclaimed = false;
            for job in state.jobs.iter_mut() {
                if job.status != JobStatus::Processing {
                    continue;
                }
                let stale = job.started_at.map_or(false, |started| started < cutoff);
                if !stale {
                    continue;
                }
                let minutes = timeout_ms / 60_000;
                job.status = JobStatus::Error;
                job.errors.push(ErrorRecord::new(
                    format!("Job timed out after {} minutes", minutes),
                    job.retry_count,
                ));
                job.finished_at = Some(Utc::now());
                reclaimed += 1;
                any_reclaimed = true;
            }
            if any_reclaimed {
                state.status = PipelineStatus::Error;
                state.updated_at = Utc::now();
            }
        }

        Ok(reclaimed)
    }

    async fn reset_jobs(&self, params: ResetJobsParams) -> Result<()> {
        let mut records = self.records.lock();
        let state = records
            .get_mut(&params.pipeline_id)
            .ok_or_else(|| PipelineError::NotFound(params.pipeline_id.clone()))?;

        for idx in &params.reset_job_indices {
            let job = state
                .jobs
                .get_mut(*idx)
                .ok_or_else(|| job_error(&params.pipeline_id, state, *idx))?;
            job.status = JobStatus::Pending;
            job.artifact = None;
            job.errors.clear();
            job.started_at = None;
            job.finished_at = None;
            job.retry_count = 0;
        }
        if let Some(min_idx) = params.reset_job_indices.iter().min() {
            state.current_job_index = *min_idx;
        }
        state.status = PipelineStatus::Processing;
        if let Some(job_options) = params.job_options {
            state.job_options = job_options;
        }
        state.updated_at = Utc::now();
        Ok(())
    }
}
