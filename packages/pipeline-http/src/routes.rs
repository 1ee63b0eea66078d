//! One route per pipeline type (spec §6): `POST` starts or retries
//! depending on the `action` query parameter, `GET` dispatches on `action`
//! to status/result/list/job/pipeline.

use crate::error::{ApiError, ApiResponse};
use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use pipeline_core::{Engine, JsonValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub pipeline_type: Arc<str>,
    pub debug_enabled: bool,
}

/// Build the router for one registered pipeline type. The caller mounts
/// this at whatever path the operator chose for that pipeline (spec §6).
pub fn pipeline_router(pipeline_type: impl Into<String>, engine: Engine, debug_enabled: bool) -> Router {
    let state = AppState {
        engine,
        pipeline_type: Arc::from(pipeline_type.into()),
        debug_enabled,
    };

    Router::new()
        .route("/", post(post_handler))
        .route("/", get(get_handler))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct QueryParams {
    action: Option<String>,
    id: Option<String>,
    #[serde(rename = "jobName")]
    job_name: Option<String>,
    page: Option<u32>,
    limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct StartRequest {
    input: JsonValue,
    #[serde(rename = "jobOptions")]
    job_options: Option<HashMap<String, JsonValue>>,
}

#[derive(Debug, Serialize)]
struct StartResponseBody {
    #[serde(rename = "pipelineId")]
    pipeline_id: String,
    #[serde(rename = "isNew")]
    is_new: bool,
}

#[derive(Debug, Deserialize)]
struct RetryRequest {
    #[serde(rename = "jobName")]
    job_name: String,
    #[serde(rename = "jobOptions")]
    job_options: Option<HashMap<String, JsonValue>>,
}

#[derive(Debug, Serialize)]
struct RetryResponseBody {
    #[serde(rename = "pipelineId")]
    pipeline_id: String,
    #[serde(rename = "fromJobName")]
    from_job_name: String,
    #[serde(rename = "jobsToRerun")]
    jobs_to_rerun: usize,
}

async fn post_handler(
    State(state): State<AppState>,
    Query(params): Query<QueryParams>,
    body: axum::body::Bytes,
) -> Result<Json<ApiResponse<JsonValue>>, ApiError> {
    match params.action.as_deref() {
        Some("retry") => retry(state, params, &body).await,
        Some(other) => Err(ApiError::UnknownAction(other.to_string())),
        None => start(state, &body).await,
    }
}

async fn start(
    state: AppState,
    body: &[u8],
) -> Result<Json<ApiResponse<JsonValue>>, ApiError> {
    let req: StartRequest = serde_json::from_slice(body)
        .map_err(|e| ApiError::InvalidInput(format!("invalid request body: {e}")))?;

    let result = state
        .engine
        .start_pipeline(
            &state.pipeline_type,
            req.input,
            req.job_options,
            Default::default(),
        )
        .await?;

    let data = serde_json::to_value(StartResponseBody {
        pipeline_id: result.pipeline_id,
        is_new: result.is_new,
    })
    .expect("StartResponseBody always serializes");

    Ok(Json(ApiResponse::ok(data)))
}

async fn retry(
    state: AppState,
    params: QueryParams,
    body: &[u8],
) -> Result<Json<ApiResponse<JsonValue>>, ApiError> {
    let id = params
        .id
        .ok_or_else(|| ApiError::InvalidInput("missing 'id' query parameter".to_string()))?;
    let req: RetryRequest = serde_json::from_slice(body)
        .map_err(|e| ApiError::InvalidInput(format!("invalid request body: {e}")))?;

    let result = state
        .engine
        .restart_pipeline_from_job(&id, &req.job_name, req.job_options)
        .await?;

    let data = serde_json::to_value(RetryResponseBody {
        pipeline_id: result.pipeline_id,
        from_job_name: result.from_job_name,
        jobs_to_rerun: result.jobs_to_rerun,
    })
    .expect("RetryResponseBody always serializes");

    Ok(Json(ApiResponse::ok(data)))
}

async fn get_handler(
    State(state): State<AppState>,
    Query(params): Query<QueryParams>,
) -> Result<Json<ApiResponse<JsonValue>>, ApiError> {
    match params.action.as_deref() {
        Some("status") => status(state, params).await,
        Some("result") => result(state, params).await,
        Some("list") => list(state, params).await,
        Some("job") => job(state, params).await,
        Some("pipeline") => pipeline(state, params).await,
        Some(other) => Err(ApiError::UnknownAction(other.to_string())),
        None => Err(ApiError::InvalidInput(
            "missing 'action' query parameter; valid actions are: status, result, list, job, pipeline"
                .to_string(),
        )),
    }
}

fn require_id(params: &QueryParams) -> Result<String, ApiError> {
    params
        .id
        .clone()
        .ok_or_else(|| ApiError::InvalidInput("missing 'id' query parameter".to_string()))
}

async fn status(state: AppState, params: QueryParams) -> Result<Json<ApiResponse<JsonValue>>, ApiError> {
    let id = require_id(&params)?;
    let response = state.engine.get_status(&id).await?;
    let data = serde_json::to_value(response).expect("StatusResponse always serializes");
    Ok(Json(ApiResponse::ok(data)))
}

async fn result(state: AppState, params: QueryParams) -> Result<Json<ApiResponse<JsonValue>>, ApiError> {
    let id = require_id(&params)?;
    let response = state.engine.get_result(&id, params.job_name.as_deref()).await?;
    let data = serde_json::to_value(response).expect("ResultResponse always serializes");
    Ok(Json(ApiResponse::ok(data)))
}

async fn list(state: AppState, params: QueryParams) -> Result<Json<ApiResponse<JsonValue>>, ApiError> {
    let page = params.page.unwrap_or(1);
    let limit = params.limit.unwrap_or(20);
    let response = state
        .engine
        .list_pipelines(Some(state.pipeline_type.to_string()), page, limit)
        .await?;
    let data = serde_json::to_value(PagedResponseBody::from(response))
        .expect("paged listing always serializes");
    Ok(Json(ApiResponse::ok(data)))
}

#[derive(Debug, Serialize)]
struct PagedResponseBody {
    items: Vec<pipeline_core::PipelineState>,
    total: u64,
    page: u32,
    limit: u32,
    #[serde(rename = "totalPages")]
    total_pages: u32,
}

impl From<pipeline_core::PagedResult<pipeline_core::PipelineState>> for PagedResponseBody {
    fn from(paged: pipeline_core::PagedResult<pipeline_core::PipelineState>) -> Self {
        Self {
            items: paged.items,
            total: paged.total,
            page: paged.page,
            limit: paged.limit,
            total_pages: paged.total_pages,
        }
    }
}

async fn job(state: AppState, params: QueryParams) -> Result<Json<ApiResponse<JsonValue>>, ApiError> {
    if !state.debug_enabled {
        return Err(ApiError::DebugDisabled);
    }
    let id = require_id(&params)?;
    let job_name = params
        .job_name
        .ok_or_else(|| ApiError::InvalidInput("missing 'jobName' query parameter".to_string()))?;

    let pipeline = state
        .engine
        .get_pipeline(&id)
        .await?
        .ok_or_else(|| pipeline_core::PipelineError::NotFound(id.clone()))?;

    let job_state = pipeline
        .jobs
        .iter()
        .find(|j| j.name == job_name)
        .ok_or_else(|| pipeline_core::PipelineError::JobNotFound {
            pipeline_id: id.clone(),
            job_name: job_name.clone(),
        })?;

    let data = serde_json::to_value(job_state).expect("JobState always serializes");
    Ok(Json(ApiResponse::ok(data)))
}

async fn pipeline(state: AppState, params: QueryParams) -> Result<Json<ApiResponse<JsonValue>>, ApiError> {
    if !state.debug_enabled {
        return Err(ApiError::DebugDisabled);
    }
    let id = require_id(&params)?;
    let pipeline = state
        .engine
        .get_pipeline(&id)
        .await?
        .ok_or_else(|| pipeline_core::PipelineError::NotFound(id.clone()))?;

    let data = serde_json::to_value(pipeline).expect("PipelineState always serializes");
    Ok(Json(ApiResponse::ok(data)))
}
