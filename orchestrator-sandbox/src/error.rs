use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("path traversal attempt: {0} resolves outside the workspace")]
    PathEscape(String),

    #[error("symlink escape attempt: {0} resolves outside the workspace")]
    SymlinkEscape(String),

    #[error("tool not found: {0}")]
    UnknownTool(String),

    #[error("invalid arguments for tool {tool}: {message}")]
    InvalidArgs { tool: String, message: String },

    #[error("tool execution failed: {0}")]
    ToolFailed(String),

    #[error("confirmation timed out after {0:?}")]
    ConfirmationTimeout(std::time::Duration),

    #[error("action was rejected by the user")]
    ActionRejected,

    #[error("session was cancelled")]
    Cancelled,

    #[error("planner returned an unparseable response: {0}")]
    UnparseablePlan(String),

    #[error("orchestrator error: {0}")]
    Orchestrator(#[from] orchestrator_core::error::OrchestratorError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SandboxResult<T> = Result<T, SandboxError>;
