//! Error types for pymesh-stats

use thiserror::Error;

/// Errors that can occur in statistics operations
#[derive(Debug, Error)]
pub enum StatsError {
    /// I/O error on the job file
    #[error("I/O error: {0}")]
    Io(String),

    /// Job could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Start request is not usable
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Every job id is taken
    #[error("No free job id")]
    IdsExhausted,
}

impl From<std::io::Error> for StatsError {
    fn from(err: std::io::Error) -> Self {
        StatsError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StatsError {
    fn from(err: serde_json::Error) -> Self {
        StatsError::Serialization(err.to_string())
    }
}

impl StatsError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }
}

/// Result type for statistics operations
pub type StatsResult<T> = Result<T, StatsError>;
