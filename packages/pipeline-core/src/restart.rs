//! Restart coordinator (spec §4.4): locate a job by name, compute the
//! reset set, reset durable state, dispatch execution with a start-stage
//! offset.

use crate::engine::Engine;
use crate::error::{PipelineError, Result};
use crate::model::{JobStatus, PipelineStatus};
use crate::storage::ResetJobsParams;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use tracing::error;

#[derive(Debug, Clone)]
pub struct RestartResult {
    pub pipeline_id: String,
    pub from_job_name: String,
    pub from_job_index: usize,
    pub jobs_to_rerun: usize,
}

impl Engine {
    /// `restartPipelineFromJob` (spec §4.4).
    pub async fn restart_pipeline_from_job(
        &self,
        pipeline_id: &str,
        from_job_name: &str,
        job_options: Option<HashMap<String, JsonValue>>,
    ) -> Result<RestartResult> {
        let state = self
            .storage()
            .find_by_id(pipeline_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(pipeline_id.to_string()))?;

        if state.status == PipelineStatus::Processing {
            return Err(PipelineError::InvalidState(format!(
                "pipeline {} is currently processing",
                pipeline_id
            )));
        }

        let config = self.registry().lookup(&state.pipeline_type)?;
        let (from_job_index, from_stage_index) =
            config.find_job(from_job_name).ok_or_else(|| PipelineError::JobNotFound {
                pipeline_id: pipeline_id.to_string(),
                job_name: from_job_name.to_string(),
            })?;

        // Reset set (spec §4.4.4): the target, every job in a later
        // stage, and not-yet-done siblings in the target's own stage.
        let mut reset_indices = Vec::new();
        let mut flat_idx = 0usize;
        for (stage_idx, stage_jobs) in config.stages.iter().enumerate() {
            for _ in stage_jobs {
                let is_target = flat_idx == from_job_index;
                let later_stage = stage_idx > from_stage_index;
                let sibling_not_done = stage_idx == from_stage_index
                    && !is_target
                    && state
                        .jobs
                        .get(flat_idx)
                        .map(|j| j.status != JobStatus::Done)
                        .unwrap_or(true);

                if is_target || later_stage || sibling_not_done {
                    reset_indices.push(flat_idx);
                }
                flat_idx += 1;
            }
        }

        self.storage()
            .reset_jobs(ResetJobsParams {
                pipeline_id: pipeline_id.to_string(),
                reset_job_indices: reset_indices.clone(),
                job_options,
            })
            .await?;

        let engine = self.clone();
        let pipeline_input = state.input.clone();
        let config_for_run = config.clone();
        let run_id = pipeline_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = engine
                .run(run_id.clone(), config_for_run, from_stage_index, pipeline_input)
                .await
            {
                error!(pipeline_id = %run_id, error = %e, "restarted pipeline execution failed");
            }
        });

        Ok(RestartResult {
            pipeline_id: pipeline_id.to_string(),
            from_job_name: from_job_name.to_string(),
            from_job_index,
            jobs_to_rerun: reset_indices.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, StartOptions};
    use crate::model::{ExecuteResult, JobContext, JobDefinition, JobRef, PipelineConfig, StageSpec};
    use crate::model::JsonValue as ModelJsonValue;
    use crate::registry::Registry;
    use crate::storage::{FindAllParams, PagedResult, Storage};
    use async_trait::async_trait;
    use chrono::Utc;
    use futures::future::BoxFuture;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::time::Duration;

    #[derive(Default)]
    struct TestStorage {
        states: Mutex<HashMap<String, crate::model::PipelineState>>,
    }

    #[async_trait]
    impl Storage for TestStorage {
        async fn find_by_id(&self, id: &str) -> Result<Option<crate::model::PipelineState>> {
            Ok(self.states.lock().get(id).cloned())
        }

        async fn find_all(&self, _params: FindAllParams) -> Result<PagedResult<crate::model::PipelineState>> {
            unimplemented!()
        }

        async fn create(&self, state: crate::model::PipelineState) -> Result<crate::model::PipelineState> {
            self.states.lock().insert(state.pipeline_id.clone(), state.clone());
            Ok(state)
        }

        async fn delete(&self, id: &str) -> Result<bool> {
            Ok(self.states.lock().remove(id).is_some())
        }

        async fn update_status(&self, id: &str, status: PipelineStatus) -> Result<()> {
            self.states.lock().get_mut(id).unwrap().status = status;
            Ok(())
        }

        async fn update_job_status(
            &self,
            id: &str,
            job_index: usize,
            status: JobStatus,
            started_at: Option<chrono::DateTime<Utc>>,
        ) -> Result<()> {
            let mut guard = self.states.lock();
            let state = guard.get_mut(id).unwrap();
            state.current_job_index = job_index;
            let job = &mut state.jobs[job_index];
            job.status = status;
            if let Some(ts) = started_at {
                job.started_at = Some(ts);
            }
            Ok(())
        }

        async fn update_job_artifact(
            &self,
            id: &str,
            job_index: usize,
            artifact: ModelJsonValue,
            finished_at: chrono::DateTime<Utc>,
        ) -> Result<()> {
            let mut guard = self.states.lock();
            let job = &mut guard.get_mut(id).unwrap().jobs[job_index];
            job.status = JobStatus::Done;
            job.artifact = Some(artifact);
            job.finished_at = Some(finished_at);
            Ok(())
        }

        async fn append_job_error(
            &self,
            id: &str,
            job_index: usize,
            error: crate::error::ErrorRecord,
            is_final: bool,
            finished_at: Option<chrono::DateTime<Utc>>,
        ) -> Result<()> {
            let mut guard = self.states.lock();
            let state = guard.get_mut(id).unwrap();
            let job = &mut state.jobs[job_index];
            job.errors.push(error);
            if is_final {
                job.status = JobStatus::Error;
                job.finished_at = finished_at;
                state.status = PipelineStatus::Error;
            }
            Ok(())
        }

        async fn update_current_job_index(&self, id: &str, job_index: usize) -> Result<()> {
            self.states.lock().get_mut(id).unwrap().current_job_index = job_index;
            Ok(())
        }

        async fn update_job_input(
            &self,
            id: &str,
            job_index: usize,
            input: ModelJsonValue,
            options: Option<ModelJsonValue>,
        ) -> Result<()> {
            let mut guard = self.states.lock();
            let job = &mut guard.get_mut(id).unwrap().jobs[job_index];
            job.input = Some(input);
            job.options = options;
            Ok(())
        }

        async fn update_job_retry_count(
            &self,
            id: &str,
            job_index: usize,
            retry_count: u32,
            max_retries: u32,
        ) -> Result<()> {
            let mut guard = self.states.lock();
            let job = &mut guard.get_mut(id).unwrap().jobs[job_index];
            job.retry_count = retry_count;
            job.max_retries = max_retries;
            Ok(())
        }

        async fn find_and_timeout_stale_jobs(&self, _timeout_ms: i64) -> Result<u64> {
            Ok(0)
        }

        async fn reset_jobs(&self, params: ResetJobsParams) -> Result<()> {
            let mut guard = self.states.lock();
            let state = guard.get_mut(&params.pipeline_id).unwrap();
            for idx in &params.reset_job_indices {
                let job = &mut state.jobs[*idx];
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
            Ok(())
        }
    }

    fn stamped_execute(label: &'static str) -> crate::model::ExecuteFn {
        Arc::new(move |_input, _options, _ctx: JobContext| -> BoxFuture<'static, ExecuteResult> {
            Box::pin(async move { Ok(ModelJsonValue::String(label.to_string())) })
        })
    }

    #[tokio::test]
    async fn restart_from_middle_stage_resets_only_later_work_scenario_s6() {
        let registry = Arc::new(Registry::new());
        registry.register(PipelineConfig::new(
            "four-stage",
            vec![
                StageSpec::job(JobDefinition::new("a", stamped_execute("A"))),
                StageSpec::job(JobDefinition::new("b", stamped_execute("B"))),
                StageSpec::job(JobDefinition::new("c", stamped_execute("C"))),
                StageSpec::job(JobDefinition::new("d", stamped_execute("D"))),
            ],
        ));
        let storage = Arc::new(TestStorage::default());
        let engine = Engine::new(registry, storage.clone());

        let start = engine
            .start_pipeline("four-stage", ModelJsonValue::Null, None, StartOptions::default())
            .await
            .unwrap();

        for _ in 0..50 {
            let state = storage.find_by_id(&start.pipeline_id).await.unwrap().unwrap();
            if state.status != PipelineStatus::Processing {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let before = storage.find_by_id(&start.pipeline_id).await.unwrap().unwrap();
        assert_eq!(before.status, PipelineStatus::Done);
        let b_finished_at = before.jobs[1].finished_at;

        let restart = engine
            .restart_pipeline_from_job(&start.pipeline_id, "c", None)
            .await
            .unwrap();
        assert_eq!(restart.from_job_index, 2);
        assert_eq!(restart.jobs_to_rerun, 2); // c, d

        for _ in 0..50 {
            let state = storage.find_by_id(&start.pipeline_id).await.unwrap().unwrap();
            if state.status != PipelineStatus::Processing {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let after = storage.find_by_id(&start.pipeline_id).await.unwrap().unwrap();
        assert_eq!(after.status, PipelineStatus::Done);
        assert_eq!(after.jobs[0].artifact, before.jobs[0].artifact);
        assert_eq!(after.jobs[1].finished_at, b_finished_at);
        assert_eq!(after.jobs[2].artifact, Some(ModelJsonValue::String("C".into())));
        assert_eq!(after.jobs[3].artifact, Some(ModelJsonValue::String("D".into())));
    }

    #[tokio::test]
    async fn restart_rejects_processing_pipeline() {
        let registry = Arc::new(Registry::new());
        registry.register(PipelineConfig::new(
            "slow",
            vec![StageSpec::single(
                JobRef::new(JobDefinition::new("only", stamped_execute("X"))),
            )],
        ));
        let storage = Arc::new(TestStorage::default());
        let engine = Engine::new(registry, storage.clone());
        let start = engine
            .start_pipeline("slow", ModelJsonValue::Null, None, StartOptions::default())
            .await
            .unwrap();

        storage
            .update_status(&start.pipeline_id, PipelineStatus::Processing)
            .await
            .unwrap();

        let err = engine
            .restart_pipeline_from_job(&start.pipeline_id, "only", None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidState(_)));
    }
}
