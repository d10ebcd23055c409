use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("conversation too large: ~{estimated} tokens exceeds the {ceiling} token ceiling")]
    TokenCeiling { estimated: usize, ceiling: usize },

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid input for tool '{tool}': {reason}")]
    InvalidToolInput { tool: String, reason: String },

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("document store error: {0}")]
    Store(String),

    #[error("tool loop exceeded {0} rounds")]
    ToolLoopExceeded(usize),

    #[error("provider error: {0}")]
    Provider(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ChatError>;
