//! Error types for the workflow engine

use thiserror::Error;

use crate::validation::ValidationReport;

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur while preparing or running a workflow
#[derive(Debug, Error)]
pub enum EngineError {
    /// The graph did not pass validation
    #[error("Workflow validation failed: {}", summarize(.0))]
    Validation(ValidationReport),

    /// A connection was rejected at edit time
    #[error("Invalid connection: {0}")]
    InvalidConnection(String),

    /// A node id could not be found in the graph
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// A node's computation failed
    #[error("Node execution failed: {0}")]
    ExecutionFailed(String),

    /// The execution backend could not be reached or answered garbage
    #[error("Backend error: {0}")]
    Backend(String),

    /// A node's backend call exceeded the configured timeout
    #[error("Node '{node_id}' timed out after {seconds}s")]
    Timeout { node_id: String, seconds: u64 },

    /// Workflow was cancelled
    #[error("Workflow cancelled")]
    Cancelled,

    /// `start()` was called before a model was bound
    #[error("No model bound")]
    NoModelBound,

    /// `start()` was called while a run was in progress
    #[error("Already running")]
    AlreadyRunning,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Create an execution failed error with a message
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::ExecutionFailed(msg.into())
    }

    /// Create a backend error with a message
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

fn summarize(report: &ValidationReport) -> String {
    report
        .errors
        .iter()
        .map(|issue| issue.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
