use thiserror::Error;

/// Error taxonomy for the orchestrator core, one variant family per subsystem.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("discovery error: {0}")]
    Discovery(String),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("server lifecycle error for {model_id}: {message}")]
    ServerLifecycle { model_id: String, message: String },

    #[error("server process died during startup: {0}")]
    ServerStartupFailed(String),

    #[error("server did not become ready within {0:?}")]
    ServerStartupTimeout(std::time::Duration),

    #[error("inference request failed: {0}")]
    Inference(String),

    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("no healthy models available in tier {0}")]
    NoModelsAvailable(orchestrator_types::ModelTier),

    #[error("retrieval provider error: {0}")]
    Retrieval(String),

    #[error("dialogue error: {0}")]
    Dialogue(String),

    #[error("instance error: {0}")]
    Instance(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
