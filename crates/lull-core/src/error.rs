//! Error types for lull core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LullError {
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid table mapping: {0}")]
    InvalidMapping(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Kafka error: {0}")]
    Kafka(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Change source closed")]
    SourceClosed,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, LullError>;

impl From<anyhow::Error> for LullError {
    fn from(err: anyhow::Error) -> Self {
        LullError::Internal(err.to_string())
    }
}
