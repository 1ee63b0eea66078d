//! Durable `Storage` implementation backed by SQLite via `sqlx`. Each
//! pipeline record is stored as a single JSON document; `pipeline_type`,
//! `status`, and `created_at` are lifted into real columns so `find_all`
//! and the watchdog scan can filter/sort in SQL without deserializing
//! every row. Mutations are read-modify-write inside one transaction per
//! call, matching the "atomic per call" contract in `pipeline_core::storage`.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use pipeline_core::error::{ErrorRecord, PipelineError, Result};
use pipeline_core::model::{JobStatus, JsonValue, PipelineState, PipelineStatus};
use pipeline_core::storage::{FindAllParams, PagedResult, ResetJobsParams, Storage};
use sqlx::{sqlite::SqlitePoolOptions, Row, SqlitePool};

use crate::error::StorageError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pipelines (
    pipeline_id   TEXT PRIMARY KEY,
    pipeline_type TEXT NOT NULL,
    status        TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    document      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_pipelines_type ON pipelines(pipeline_type);
CREATE INDEX IF NOT EXISTS idx_pipelines_status ON pipelines(status);
"#;

pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(url)
            .await
            .map_err(StorageError::from)?;
        Self::from_pool(pool).await
    }

    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .map_err(StorageError::from)?;
        Ok(Self { pool })
    }

    fn decode_document(raw: &str) -> Result<PipelineState> {
        serde_json::from_str(raw)
            .map_err(StorageError::from)
            .map_err(Into::into)
    }

    fn encode_document(state: &PipelineState) -> Result<String> {
        serde_json::to_string(state)
            .map_err(StorageError::from)
            .map_err(Into::into)
    }

    /// Read-modify-write a single document inside one transaction: fetch,
    /// run the closure, re-stamp `updatedAt`, write back, commit.
    async fn with_document<F>(&self, id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut PipelineState) -> Result<()> + Send,
    {
        let mut tx = self.pool.begin().await.map_err(StorageError::from)?;

        let row = sqlx::query("SELECT document FROM pipelines WHERE pipeline_id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(StorageError::from)?
            .ok_or_else(|| PipelineError::NotFound(id.to_string()))?;

        let raw: String = row.try_get("document").map_err(StorageError::from)?;
        let mut state = Self::decode_document(&raw)?;

        f(&mut state)?;
        state.updated_at = Utc::now();

        let document = Self::encode_document(&state)?;
        let status = serde_json::to_value(state.status)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();

        sqlx::query("UPDATE pipelines SET document = ?, status = ? WHERE pipeline_id = ?")
            .bind(&document)
            .bind(&status)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(StorageError::from)?;

        tx.commit().await.map_err(StorageError::from)?;
        Ok(())
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn find_by_id(&self, id: &str) -> Result<Option<PipelineState>> {
        let row = sqlx::query("SELECT document FROM pipelines WHERE pipeline_id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;
        match row {
            Some(row) => {
                let raw: String = row.try_get("document").map_err(StorageError::from)?;
                Ok(Some(Self::decode_document(&raw)?))
            }
            None => Ok(None),
        }
    }

    async fn find_all(&self, params: FindAllParams) -> Result<PagedResult<PipelineState>> {
        let limit = params.limit.max(1);
        let page = params.page.max(1);
        let offset = ((page - 1) as i64) * (limit as i64);

        let total: i64 = if let Some(ref t) = params.pipeline_type {
            sqlx::query("SELECT COUNT(*) AS c FROM pipelines WHERE pipeline_type = ?")
                .bind(t)
                .fetch_one(&self.pool)
                .await
        } else {
            sqlx::query("SELECT COUNT(*) AS c FROM pipelines")
                .fetch_one(&self.pool)
                .await
        }
        .map_err(StorageError::from)?
        .try_get("c")
        .map_err(StorageError::from)?;

        let rows = if let Some(ref t) = params.pipeline_type {
            sqlx::query(
                "SELECT document FROM pipelines WHERE pipeline_type = ? \
                 ORDER BY created_at DESC LIMIT ? OFFSET ?",
            )
            .bind(t)
            .bind(i64::from(limit))
            .bind(offset)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query(
                "SELECT document FROM pipelines ORDER BY created_at DESC LIMIT ? OFFSET ?",
            )
            .bind(i64::from(limit))
            .bind(offset)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(StorageError::from)?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let raw: String = row.try_get("document").map_err(StorageError::from)?;
            items.push(Self::decode_document(&raw)?);
        }

        let total = total.max(0) as u64;
        let total_pages = ((total as f64) / f64::from(limit)).ceil() as u32;

        Ok(PagedResult {
            items,
            total,
            page,
            limit,
            total_pages,
        })
    }

    async fn create(&self, mut state: PipelineState) -> Result<PipelineState> {
        let now = Utc::now();
        state.created_at = now;
        state.updated_at = now;

        let document = Self::encode_document(&state)?;
        let status = serde_json::to_value(state.status)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();

        let result = sqlx::query(
            "INSERT INTO pipelines (pipeline_id, pipeline_type, status, created_at, document) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&state.pipeline_id)
        .bind(&state.pipeline_type)
        .bind(&status)
        .bind(state.created_at.to_rfc3339())
        .bind(&document)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(state),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(PipelineError::DuplicatePipelineId(state.pipeline_id))
            }
            Err(err) => Err(StorageError::from(err).into()),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM pipelines WHERE pipeline_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_status(&self, id: &str, status: PipelineStatus) -> Result<()> {
        self.with_document(id, |state| {
            state.status = status;
            Ok(())
        })
        .await
    }

    async fn update_job_status(
        &self,
        id: &str,
        job_index: usize,
        status: JobStatus,
        started_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.with_document(id, |state| {
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
            Ok(())
        })
        .await
    }

    async fn update_job_artifact(
        &self,
        id: &str,
        job_index: usize,
        artifact: JsonValue,
        finished_at: DateTime<Utc>,
    ) -> Result<()> {
        self.with_document(id, |state| {
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
            Ok(())
        })
        .await
    }

    async fn append_job_error(
        &self,
        id: &str,
        job_index: usize,
        error: ErrorRecord,
        is_final: bool,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.with_document(id, |state| {
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
            Ok(())
        })
        .await
    }

    async fn update_current_job_index(&self, id: &str, job_index: usize) -> Result<()> {
        self.with_document(id, |state| {
            state.current_job_index = job_index;
            Ok(())
        })
        .await
    }

    async fn update_job_input(
        &self,
        id: &str,
        job_index: usize,
        input: JsonValue,
        options: Option<JsonValue>,
    ) -> Result<()> {
        self.with_document(id, |state| {
            let job = state
                .jobs
                .get_mut(job_index)
                .ok_or_else(|| PipelineError::JobNotFound {
                    pipeline_id: id.to_string(),
                    job_name: job_index.to_string(),
                })?;
            job.input = Some(input);
            job.options = options;
            Ok(())
        })
        .await
    }

    async fn update_job_retry_count(
        &self,
        id: &str,
        job_index: usize,
        retry_count: u32,
        max_retries: u32,
    ) -> Result<()> {
        self.with_document(id, |state| {
            let job = state
                .jobs
                .get_mut(job_index)
                .ok_or_else(|| PipelineError::JobNotFound {
                    pipeline_id: id.to_string(),
                    job_name: job_index.to_string(),
                })?;
            job.retry_count = retry_count;
            job.max_retries = max_retries;
            Ok(())
        })
        .await
    }

    async fn find_and_timeout_stale_jobs(&self, timeout_ms: i64) -> Result<u64> {
        let rows = sqlx::query("SELECT pipeline_id, document FROM pipelines WHERE status = 'processing'")
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;

        let cutoff = Utc::now() - ChronoDuration::milliseconds(timeout_ms);
        let mut reclaimed = 0u64;

        for row in rows {
            let id: String = row.try_get("pipeline_id").map_err(StorageError::from)?;
            let raw: String = row.try_get("document").map_err(StorageError::from)?;
            let mut state = Self::decode_document(&raw)?;

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
                self.with_document(&id, |doc| {
                    *doc = state;
                    Ok(())
                })
                .await?;
            }
        }

        Ok(reclaimed)
    }

    async fn reset_jobs(&self, params: ResetJobsParams) -> Result<()> {
        self.with_document(&params.pipeline_id, |state| {
            for idx in &params.reset_job_indices {
                let job = state
                    .jobs
                    .get_mut(*idx)
                    .ok_or_else(|| PipelineError::JobNotFound {
                        pipeline_id: params.pipeline_id.clone(),
                        job_name: idx.to_string(),
                    })?;
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
            if let Some(job_options) = params.job_options.clone() {
                state.job_options = job_options;
            }
            Ok(())
        })
        .await
    }
}
