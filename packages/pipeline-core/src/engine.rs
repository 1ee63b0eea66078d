//! Execution engine (spec §4.3): the stage loop, per-stage parallel
//! fan-out, synapse resolution, retry loop, and durable state transitions.

use crate::error::{ErrorRecord, PipelineError, Result};
use crate::model::{
    JobContext, JobRef, JobState, JobStatus, JsonValue, PipelineState, PipelineStatus,
    SynapseContext,
};
use crate::normalize::{compute_pipeline_id, NormalizedPipeline};
use crate::registry::Registry;
use crate::storage::Storage;
use chrono::Utc;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct StartResult {
    pub pipeline_id: String,
    pub is_new: bool,
}

/// Hands the spawned execution's join handle to a caller-supplied hook,
/// letting a serverless host keep the process alive past response
/// delivery (spec §5, "HTTP serverless extension"). Conventional
/// deployments pass `None` and let the task run to completion on its own.
pub type OnExecutionStart = Box<dyn FnOnce(tokio::task::JoinHandle<()>) + Send>;

#[derive(Default)]
pub struct StartOptions {
    pub on_execution_start: Option<OnExecutionStart>,
}

impl std::fmt::Debug for StartOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartOptions")
            .field("on_execution_start", &self.on_execution_start.is_some())
            .finish()
    }
}

/// Orchestrates pipeline runs against a registry of configurations and a
/// storage backend. Cheap to clone: both fields are `Arc`.
#[derive(Clone)]
pub struct Engine {
    registry: Arc<Registry>,
    storage: Arc<dyn Storage>,
}

impl Engine {
    pub fn new(registry: Arc<Registry>, storage: Arc<dyn Storage>) -> Self {
        Self { registry, storage }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// `startPipeline` (spec §4.3).
    pub async fn start_pipeline(
        &self,
        pipeline_type: &str,
        data: JsonValue,
        job_options: Option<HashMap<String, JsonValue>>,
        mut options: StartOptions,
    ) -> Result<StartResult> {
        let config = self.registry.lookup(pipeline_type)?;
        let pipeline_id =
            compute_pipeline_id(pipeline_type, &data, config.compute_input_hash.as_ref());

        if let Some(existing) = self.storage.find_by_id(&pipeline_id).await? {
            if existing.config_hash == config.config_hash {
                return Ok(StartResult {
                    pipeline_id,
                    is_new: false,
                });
            }
            info!(
                pipeline_id = %pipeline_id,
                "config hash changed ({} -> {}), discarding prior run",
                existing.config_hash,
                config.config_hash
            );
            self.storage.delete(&pipeline_id).await?;
        }

        let job_options = job_options.unwrap_or_default();
        let state = fresh_state(&pipeline_id, pipeline_type, &config, data.clone(), job_options);

        let created = match self.storage.create(state.clone()).await {
            Ok(s) => s,
            Err(PipelineError::DuplicatePipelineId(_)) => {
                // Concurrent start of the same pipelineId raced us. Re-read
                // rather than propagate (spec §9 open question #1): if the
                // winner's configHash matches ours, treat this as a normal
                // memoized hit.
                match self.storage.find_by_id(&pipeline_id).await? {
                    Some(existing) if existing.config_hash == config.config_hash => {
                        return Ok(StartResult {
                            pipeline_id,
                            is_new: false,
                        });
                    }
                    Some(_) => {
                        return Err(PipelineError::InvalidState(format!(
                            "pipeline {} was recreated with a different shape concurrently",
                            pipeline_id
                        )));
                    }
                    None => {
                        return Err(PipelineError::InvalidState(format!(
                            "pipeline {} reported duplicate but is now missing",
                            pipeline_id
                        )));
                    }
                }
            }
            Err(e) => return Err(e),
        };

        let engine = self.clone();
        let config = config.clone();
        let pipeline_input = created.input.clone();
        let run_id = created.pipeline_id.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = engine.run(run_id.clone(), config, 0, pipeline_input).await {
                error!(pipeline_id = %run_id, error = %e, "pipeline execution failed");
            }
        });

        if let Some(hook) = options.on_execution_start.take() {
            hook(handle);
        }

        Ok(StartResult {
            pipeline_id,
            is_new: true,
        })
    }

    /// Drive the stage loop starting at `start_from_stage_index` (0 for a
    /// fresh start; the restart coordinator passes the target job's stage
    /// index). `pipeline_input` is the original run input.
    pub(crate) async fn run(
        &self,
        pipeline_id: String,
        config: Arc<NormalizedPipeline>,
        start_from_stage_index: usize,
        pipeline_input: JsonValue,
    ) -> Result<()> {
        let mut artifacts: HashMap<String, JsonValue> = HashMap::new();
        let mut default_input = pipeline_input.clone();
        let mut flat_index = 0usize;

        for (stage_idx, stage_jobs) in config.stages.iter().enumerate() {
            if stage_idx < start_from_stage_index {
                // Restart skip (spec §4.3.b): load prior artifacts, don't execute.
                let state = self.require_state(&pipeline_id).await?;
                for job_ref in stage_jobs {
                    if let Some(job_state) = state.jobs.get(flat_index) {
                        if let Some(artifact) = &job_state.artifact {
                            artifacts.insert(job_ref.name().to_string(), artifact.clone());
                        }
                    }
                    flat_index += 1;
                }
                if stage_jobs.len() == 1 {
                    if let Some(job_state) = state.jobs.get(flat_index - 1) {
                        if job_state.status == JobStatus::Done {
                            if let Some(artifact) = &job_state.artifact {
                                default_input = artifact.clone();
                            }
                        }
                    }
                }
                continue;
            }

            let state = self.require_state(&pipeline_id).await?;
            let stage_start_flat_index = flat_index;

            let mut jobs_to_execute: Vec<(usize, &JobRef)> = Vec::new();
            for (offset, job_ref) in stage_jobs.iter().enumerate() {
                let idx = stage_start_flat_index + offset;
                match state.jobs.get(idx) {
                    Some(job_state) if job_state.status == JobStatus::Done => {
                        if let Some(artifact) = &job_state.artifact {
                            artifacts.insert(job_ref.name().to_string(), artifact.clone());
                        }
                    }
                    _ => jobs_to_execute.push((idx, job_ref)),
                }
            }
            flat_index = stage_start_flat_index + stage_jobs.len();

            if jobs_to_execute.is_empty() {
                if stage_jobs.len() == 1 {
                    if let Some(artifact) = artifacts.get(stage_jobs[0].name()) {
                        default_input = artifact.clone();
                    }
                }
                continue;
            }

            for (idx, _) in &jobs_to_execute {
                self.storage
                    .update_job_status(&pipeline_id, *idx, JobStatus::Processing, Some(Utc::now()))
                    .await?;
            }

            let synapse_ctx_input = pipeline_input.clone();
            let snapshot_artifacts = artifacts.clone();
            let stage_default_input = default_input.clone();
            let job_options_by_name: HashMap<String, JsonValue> = state
                .job_options
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();

            let futures = jobs_to_execute.iter().map(|(idx, job_ref)| {
                let storage = self.storage.clone();
                let pipeline_id = pipeline_id.clone();
                let job_ref = (*job_ref).clone();
                let idx = *idx;
                let synapse_ctx = SynapseContext::new(&synapse_ctx_input, &snapshot_artifacts);
                let job_input = match &job_ref.synapse {
                    Some(synapse) => synapse(&synapse_ctx),
                    None => stage_default_input.clone(),
                };
                let options = job_options_by_name.get(job_ref.name()).cloned();
                async move { run_job(storage, pipeline_id, idx, job_ref, job_input, options).await }
            });

            let results = join_all(futures).await;

            let mut stage_failed = false;
            for (i, result) in results.into_iter().enumerate() {
                let (idx, job_ref) = &jobs_to_execute[i];
                match result {
                    Ok(artifact) => {
                        artifacts.insert(job_ref.name().to_string(), artifact);
                    }
                    Err(()) => {
                        warn!(
                            pipeline_id = %pipeline_id,
                            job = job_ref.name(),
                            job_index = idx,
                            "job failed terminally"
                        );
                        stage_failed = true;
                    }
                }
            }

            if stage_failed {
                self.storage
                    .update_status(&pipeline_id, PipelineStatus::Error)
                    .await?;
                return Ok(());
            }

            if stage_jobs.len() == 1 {
                if let Some(artifact) = artifacts.get(stage_jobs[0].name()) {
                    default_input = artifact.clone();
                }
            }
        }

        self.storage
            .update_status(&pipeline_id, PipelineStatus::Done)
            .await?;
        Ok(())
    }

    pub(crate) async fn require_state(&self, pipeline_id: &str) -> Result<PipelineState> {
        self.storage
            .find_by_id(pipeline_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(pipeline_id.to_string()))
    }
}

/// Run one job's full retry loop (spec §4.3.e). Returns the artifact on
/// eventual success, or `Err(())` once the terminal attempt has failed and
/// been persisted.
async fn run_job(
    storage: Arc<dyn Storage>,
    pipeline_id: String,
    job_index: usize,
    job_ref: JobRef,
    job_input: JsonValue,
    options: Option<JsonValue>,
) -> std::result::Result<JsonValue, ()> {
    let options_value = options.clone().unwrap_or(JsonValue::Null);

    if let Err(e) = storage
        .update_job_input(&pipeline_id, job_index, job_input.clone(), options.clone())
        .await
    {
        error!(pipeline_id = %pipeline_id, job_index, error = %e, "failed to persist job input");
        return Err(());
    }

    if job_ref.retries > 0 {
        if let Err(e) = storage
            .update_job_retry_count(&pipeline_id, job_index, 0, job_ref.retries)
            .await
        {
            error!(pipeline_id = %pipeline_id, job_index, error = %e, "failed to persist retry meter");
            return Err(());
        }
    }

    for attempt in 0..=job_ref.retries {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(job_ref.retry_delay_ms)).await;
            if let Err(e) = storage
                .update_job_retry_count(&pipeline_id, job_index, attempt, job_ref.retries)
                .await
            {
                error!(pipeline_id = %pipeline_id, job_index, error = %e, "failed to persist retry meter");
                return Err(());
            }
            if let Err(e) = storage
                .update_job_status(&pipeline_id, job_index, JobStatus::Processing, None)
                .await
            {
                error!(pipeline_id = %pipeline_id, job_index, error = %e, "failed to persist retry status");
                return Err(());
            }
        }

        let ctx = JobContext {
            pipeline_id: pipeline_id.clone(),
            job_index,
        };

        match (job_ref.job.execute)(job_input.clone(), options_value.clone(), ctx).await {
            Ok(artifact) => {
                if let Err(e) = storage
                    .update_job_artifact(&pipeline_id, job_index, artifact.clone(), Utc::now())
                    .await
                {
                    error!(pipeline_id = %pipeline_id, job_index, error = %e, "failed to persist artifact");
                    return Err(());
                }
                return Ok(artifact);
            }
            Err(job_err) => {
                let mut record = ErrorRecord::new(job_err.message.clone(), attempt);
                if let Some(stack) = &job_err.stack {
                    record = record.with_stack(stack.clone());
                }
                let is_final = attempt == job_ref.retries;
                let finished_at = if is_final { Some(Utc::now()) } else { None };
                if let Err(e) = storage
                    .append_job_error(&pipeline_id, job_index, record, is_final, finished_at)
                    .await
                {
                    error!(pipeline_id = %pipeline_id, job_index, error = %e, "failed to persist error record");
                    return Err(());
                }
                if is_final {
                    return Err(());
                }
            }
        }
    }

    unreachable!("retry loop always returns on its final iteration")
}

fn fresh_state(
    pipeline_id: &str,
    pipeline_type: &str,
    config: &NormalizedPipeline,
    input: JsonValue,
    job_options: HashMap<String, JsonValue>,
) -> PipelineState {
    let now = Utc::now();
    let jobs = config
        .flat_jobs()
        .into_iter()
        .map(|job_ref| {
            let mut state = JobState::pending(job_ref.name());
            state.max_retries = job_ref.retries;
            state
        })
        .collect();

    PipelineState {
        pipeline_id: pipeline_id.to_string(),
        pipeline_type: pipeline_type.to_string(),
        status: PipelineStatus::Processing,
        current_job_index: 0,
        input,
        job_options,
        jobs,
        config_hash: config.config_hash.clone(),
        created_at: now,
        updated_at: now,
    }
}
