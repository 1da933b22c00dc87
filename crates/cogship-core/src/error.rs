use thiserror::Error;

#[derive(Debug, Error)]
pub enum CogshipError {
    #[error("not initialized: no cogship.yaml found in {0}")]
    NotInitialized(String),

    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("model selection is empty: pass a model id, a comma-separated list, or 'all'")]
    EmptySelection,

    #[error("model already registered: {0}")]
    DuplicateModel(String),

    #[error("template error: {0}")]
    Template(String),

    #[error("{phase} push failed: {detail}")]
    PushFailure { phase: String, detail: String },

    #[error("credential error: {0}")]
    Credential(String),

    #[error("failed to spawn push tool: {0}")]
    PushToolSpawn(String),

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CogshipError>;
