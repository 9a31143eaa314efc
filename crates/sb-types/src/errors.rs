//! Error types and conversions

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Framing error: {0}")]
    Frame(String),

    #[error("Frame too large: {actual} bytes exceeds cap of {limit}")]
    FrameTooLarge { actual: usize, limit: usize },

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Unknown session: {0}")]
    SessionNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl From<AppError> for String {
    fn from(err: AppError) -> String {
        err.to_string()
    }
}
