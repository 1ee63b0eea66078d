//! Pipeline registry (spec §4.2): a name-indexed, in-process mapping from
//! pipeline type to configuration, normalized at registration time.

use crate::error::{PipelineError, Result};
use crate::model::PipelineConfig;
use crate::normalize::{normalize, NormalizedPipeline};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Write-once-per-type, read-many registry. Registration typically happens
/// once at process start; lookups happen on every `startPipeline`, `status`,
/// and `restart` call, so reads never block on a writer.
#[derive(Default)]
pub struct Registry {
    configs: RwLock<HashMap<String, Arc<NormalizedPipeline>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            configs: RwLock::new(HashMap::new()),
        }
    }

    /// Register a pipeline configuration under `config.name`. Idempotent:
    /// a second registration under the same name replaces the first.
    pub fn register(&self, config: PipelineConfig) {
        let name = config.name.clone();
        let normalized = normalize(config);
        self.configs.write().insert(name, Arc::new(normalized));
    }

    pub fn lookup(&self, pipeline_type: &str) -> Result<Arc<NormalizedPipeline>> {
        self.configs
            .read()
            .get(pipeline_type)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownPipelineType(pipeline_type.to_string()))
    }

    pub fn is_registered(&self, pipeline_type: &str) -> bool {
        self.configs.read().contains_key(pipeline_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExecuteResult, JobContext, JobDefinition, JsonValue, StageSpec};
    use futures::future::BoxFuture;

    fn noop_execute() -> crate::model::ExecuteFn {
        Arc::new(|_input, _options, _ctx: JobContext| -> BoxFuture<'static, ExecuteResult> {
            Box::pin(async { Ok(JsonValue::Null) })
        })
    }

    fn sample_config(name: &str) -> PipelineConfig {
        PipelineConfig::new(
            name,
            vec![StageSpec::job(JobDefinition::new(
                "only",
                noop_execute(),
            ))],
        )
    }

    #[test]
    fn lookup_fails_for_unregistered_type() {
        let registry = Registry::new();
        let err = registry.lookup("demo").unwrap_err();
        assert!(matches!(err, PipelineError::UnknownPipelineType(_)));
    }

    #[test]
    fn register_then_lookup_round_trips() {
        let registry = Registry::new();
        registry.register(sample_config("demo"));
        let found = registry.lookup("demo").unwrap();
        assert_eq!(found.name, "demo");
        assert!(registry.is_registered("demo"));
    }

    #[test]
    fn re_registering_same_name_replaces_prior_config() {
        let registry = Registry::new();
        registry.register(sample_config("demo"));
        let first = registry.lookup("demo").unwrap();

        let replacement = PipelineConfig::new(
            "demo",
            vec![
                StageSpec::job(JobDefinition::new("a", noop_execute())),
                StageSpec::job(JobDefinition::new("b", noop_execute())),
            ],
        );
        registry.register(replacement);
        let second = registry.lookup("demo").unwrap();

        assert_eq!(first.total_jobs(), 1);
        assert_eq!(second.total_jobs(), 2);
    }
}
