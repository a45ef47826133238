//! Handler registry: task type to the pure function computing it.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tokio::sync::RwLock;

use super::model::TaskType;
use crate::error::TaskError;

/// Pure computation for one task type.
pub type TaskHandler = Arc<dyn Fn(&[f64]) -> Result<f64, TaskError> + Send + Sync>;

/// Sum of all params, 0 for none.
pub fn sum(params: &[f64]) -> Result<f64, TaskError> {
    finite(params.iter().fold(0.0, |acc, p| acc + p))
}

/// Product of all params, 1 for none.
pub fn multiply(params: &[f64]) -> Result<f64, TaskError> {
    finite(params.iter().fold(1.0, |acc, p| acc * p))
}

fn finite(value: f64) -> Result<f64, TaskError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(TaskError::HandlerFailure {
            reason: format!("result is not a finite number ({value})"),
        })
    }
}

/// Registry of task handlers.
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<TaskType, TaskHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry holding the built-in handlers.
    pub fn with_builtins() -> Self {
        let mut handlers: HashMap<TaskType, TaskHandler> = HashMap::new();
        handlers.insert(TaskType::Sum, Arc::new(sum));
        handlers.insert(TaskType::Multiply, Arc::new(multiply));
        Self {
            handlers: RwLock::new(handlers),
        }
    }

    /// Register (or replace) the handler for a task type.
    pub async fn register(&self, task_type: TaskType, handler: TaskHandler) {
        self.handlers.write().await.insert(task_type, handler);
        tracing::debug!("Registered handler: {}", task_type);
    }

    /// Remove the handler for a task type.
    pub async fn unregister(&self, task_type: TaskType) -> Option<TaskHandler> {
        self.handlers.write().await.remove(&task_type)
    }

    pub async fn has(&self, task_type: TaskType) -> bool {
        self.handlers.read().await.contains_key(&task_type)
    }

    /// Run the handler registered for `task_type`.
    ///
    /// An unregistered type yields `InvalidTaskType`; a panicking handler is
    /// reported as `HandlerFailure`.
    pub async fn dispatch(&self, task_type: TaskType, params: &[f64]) -> Result<f64, TaskError> {
        let handler = self
            .handlers
            .read()
            .await
            .get(&task_type)
            .cloned()
            .ok_or_else(|| TaskError::InvalidTaskType {
                task_type: task_type.to_string(),
            })?;

        catch_unwind(AssertUnwindSafe(|| handler(params))).unwrap_or_else(|_| {
            Err(TaskError::HandlerFailure {
                reason: format!("{task_type} handler panicked"),
            })
        })
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
