//! Error types for taskstore

use thiserror::Error;

/// Errors that can occur while loading or persisting task catalog state
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML plan document: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to parse JSON status file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("duplicate task id: {0}")]
    DuplicateId(String),

    #[error("circular dependency detected: {0}")]
    CircularDependency(String),

    #[error("task {task} references missing step file: {step_file}")]
    MissingStepFile { task: String, step_file: String },

    #[error("unsupported plan document version: {0}")]
    UnsupportedVersion(u32),
}
