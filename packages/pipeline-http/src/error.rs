//! Maps `PipelineError` (and a couple of adapter-local conditions) onto the
//! HTTP envelope and status codes from spec §6.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use pipeline_core::error::PipelineError;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

pub enum ApiError {
    Pipeline(PipelineError),
    InvalidInput(String),
    DebugDisabled,
    UnknownAction(String),
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        ApiError::Pipeline(err)
    }
}

impl ApiError {
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            ApiError::Pipeline(err) => match err {
                PipelineError::NotFound(_) | PipelineError::JobNotFound { .. } => {
                    (StatusCode::NOT_FOUND, err.to_string())
                }
                PipelineError::InvalidState(_) | PipelineError::InvalidInput(_) => {
                    (StatusCode::BAD_REQUEST, err.to_string())
                }
                PipelineError::UnknownPipelineType(_)
                | PipelineError::DuplicatePipelineId(_)
                | PipelineError::Timeout { .. }
                | PipelineError::Storage(_)
                | PipelineError::Other(_) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
            },
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::DebugDisabled => (
                StatusCode::FORBIDDEN,
                "debug endpoints are not enabled".to_string(),
            ),
            ApiError::UnknownAction(action) => (
                StatusCode::BAD_REQUEST,
                format!(
                    "unknown action '{action}'; valid actions are: status, result, list, job, pipeline, retry"
                ),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %message, "request failed");
        }
        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(message),
        };
        (status, Json(body)).into_response()
    }
}
