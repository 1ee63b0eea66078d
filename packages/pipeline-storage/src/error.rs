//! Error types for pipeline-storage, bridged into `pipeline_core::PipelineError`
//! so the engine stays ignorant of which backend produced a failure.

use pipeline_core::error::{PipelineError, StorageErrorProxy};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "sqlite")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("duplicate pipeline id: {0}")]
    DuplicateId(String),

    #[error("record not found: {0}")]
    NotFound(String),
}

impl From<StorageError> for PipelineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::DuplicateId(id) => PipelineError::DuplicatePipelineId(id),
            StorageError::NotFound(id) => PipelineError::NotFound(id),
            other => PipelineError::Storage(StorageErrorProxy::new(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_id_maps_to_core_duplicate_variant() {
        let err: PipelineError = StorageError::DuplicateId("abc".into()).into();
        assert!(matches!(err, PipelineError::DuplicatePipelineId(id) if id == "abc"));
    }

    #[test]
    fn other_errors_map_to_storage_proxy() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: PipelineError = StorageError::from(json_err).into();
        assert!(matches!(err, PipelineError::Storage(_)));
    }
}
