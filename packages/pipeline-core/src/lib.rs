//! Pipeline execution engine: declarative pipelines of ordered stages,
//! each stage one or more parallel jobs, with content-addressed identity,
//! durable state, retry, restart, and a stale-job watchdog.

pub mod engine;
pub mod error;
pub mod model;
pub mod normalize;
pub mod query;
pub mod registry;
pub mod restart;
pub mod storage;
pub mod watchdog;

pub use engine::{Engine, OnExecutionStart, StartOptions, StartResult};
pub use error::{ErrorRecord, JobExecutionError, PipelineError, Result};
pub use model::{
    ComputeInputHashFn, ExecuteFn, ExecuteResult, JobContext, JobDefinition, JobRef, JobState,
    JobStatus, JsonValue, PipelineConfig, PipelineState, PipelineStatus, StageSpec, SynapseContext,
    SynapseFn,
};
pub use normalize::{compute_config_hash, compute_pipeline_id, normalize, NormalizedPipeline};
pub use query::{ResultResponse, StatusError, StatusJob, StatusResponse};
pub use registry::Registry;
pub use restart::RestartResult;
pub use storage::{FindAllParams, PagedResult, ResetJobsParams, Storage};
pub use watchdog::{OnStaleJobsFound, Watchdog, WatchdogConfig};
