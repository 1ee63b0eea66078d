//! Boot code: wires one demo pipeline into a registry, picks a storage
//! backend from `DATABASE_URL`, starts the watchdog, and serves the
//! resulting router. Not part of the core (spec §6) — a stand-in for
//! whatever process-boot wiring a real deployment would do instead.

use pipeline_core::{
    Engine, JobDefinition, JobRef, PipelineConfig, Registry, StageSpec, Watchdog, WatchdogConfig,
};
use pipeline_http::{pipeline_router, HttpConfig};
use pipeline_storage::{InMemoryStorage, SqliteStorage};
use std::sync::Arc;

fn demo_pipeline() -> PipelineConfig {
    let fetch = JobDefinition::new(
        "fetch",
        Arc::new(|input, _options, _ctx| {
            Box::pin(async move {
                let seed = input.get("seed").and_then(|v| v.as_i64()).unwrap_or(0);
                Ok(serde_json::json!({ "value": seed + 1 }))
            }) as futures::future::BoxFuture<'static, pipeline_core::ExecuteResult>
        }),
    );
    let transform = JobRef::new(JobDefinition::new(
        "transform",
        Arc::new(|input, _options, _ctx| {
            Box::pin(async move {
                let value = input.get("value").and_then(|v| v.as_i64()).unwrap_or(0);
                Ok(serde_json::json!({ "value": value * 2 }))
            }) as futures::future::BoxFuture<'static, pipeline_core::ExecuteResult>
        }),
    ))
    .with_synapse(Arc::new(|ctx| {
        ctx.get_artifact("fetch").cloned().unwrap_or(serde_json::Value::Null)
    }));

    PipelineConfig::new("demo", vec![StageSpec::job(fetch), StageSpec::single(transform)])
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = HttpConfig::from_env();

    let registry = Arc::new(Registry::new());
    registry.register(demo_pipeline());

    let storage: Arc<dyn pipeline_core::Storage> = if config.database_url == "sqlite::memory:" {
        Arc::new(InMemoryStorage::new())
    } else {
        Arc::new(SqliteStorage::connect(&config.database_url).await?)
    };

    let engine = Engine::new(registry, storage.clone());

    let mut watchdog = Watchdog::new(storage, WatchdogConfig::default());
    watchdog.start();

    let router = pipeline_router("demo", engine, config.enable_debug_endpoints);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(port = config.port, "pipeline-http listening");
    axum::serve(listener, router).await?;

    watchdog.stop().await;
    Ok(())
}
