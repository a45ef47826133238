//! Error types for the task runner.

use crate::tasks::model::TaskStatus;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors raised while submitting, querying or executing a task.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task with ID {id} was not found")]
    NotFound { id: String },

    #[error("Unsupported task type: '{task_type}'")]
    InvalidTaskType { task_type: String },

    #[error("Server is currently overloaded. Please try again later")]
    Overloaded,

    #[error("Handler failed: {reason}")]
    HandlerFailure { reason: String },

    #[error("Task {id} is {from}, cannot transition to {to}")]
    InvalidTransition {
        id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Storage failure: {0}")]
    Storage(#[from] DatabaseError),
}

impl TaskError {
    /// Whether a later attempt may succeed without any state change.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Overloaded)
    }
}

/// Result type alias for the task runner.
pub type Result<T> = std::result::Result<T, Error>;
