//! Error types for the node orchestrator

use pymesh_protocol::EngineError;
use pymesh_stats::StatsError;
use thiserror::Error;

/// Errors that can occur in node operations
#[derive(Debug, Error)]
pub enum NodeError {
    /// Protocol engine error
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Statistics error
    #[error("Statistics error: {0}")]
    Stats(#[from] StatsError),

    /// Scheduler already running
    #[error("Node already started")]
    AlreadyStarted,

    /// Operation needs a running scheduler
    #[error("Node not started")]
    NotStarted,

    /// Scheduler task failed to stop cleanly
    #[error("Task error: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for NodeError {
    fn from(e: tokio::task::JoinError) -> Self {
        NodeError::Task(e.to_string())
    }
}

/// Result type alias for node operations
pub type NodeResult<T> = Result<T, NodeError>;
