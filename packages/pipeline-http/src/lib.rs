//! HTTP adapter (spec §6): one Axum router per registered pipeline type,
//! a thin JSON envelope over the core's start/status/result/list/restart
//! operations. Boundary only — no orchestration logic lives here.

pub mod config;
pub mod error;
pub mod routes;

pub use config::HttpConfig;
pub use error::{ApiError, ApiResponse};
pub use routes::{pipeline_router, AppState};
