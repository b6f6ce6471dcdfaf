use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),
    #[error("Malformed source {path}: {reason}")]
    MalformedSource { path: String, reason: String },
    #[error("Embedding backend error: {0}")]
    EmbeddingBackend(String),
    #[error("Generation backend error: {0}")]
    GenerationBackend(String),
    #[error("Embedding model mismatch: index was built with '{index_model}', query uses '{query_model}'")]
    ModelMismatch {
        index_model: String,
        query_model: String,
    },
    #[error("Vector index has not been built")]
    IndexNotBuilt,
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}
