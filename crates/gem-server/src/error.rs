// crates/gem-server/src/error.rs
// Standardized error types for GEM

use thiserror::Error;

/// Main error type for the GEM library
#[derive(Error, Debug)]
pub enum GemError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("handler error: {0}")]
    Handler(String),

    #[error("task cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown error: {0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Convenience type alias for Result using GemError
pub type Result<T> = std::result::Result<T, GemError>;

impl From<String> for GemError {
    fn from(s: String) -> Self {
        GemError::Other(s)
    }
}

impl From<tokio::task::JoinError> for GemError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            GemError::Cancelled
        } else {
            GemError::Other(err.to_string())
        }
    }
}

impl From<GemError> for String {
    fn from(err: GemError) -> Self {
        err.to_string()
    }
}
