//! `TaskStore` trait, the single async interface for task persistence.

use async_trait::async_trait;
use chrono::Utc;

use crate::error::DatabaseError;
use crate::tasks::model::{Task, TaskStatus, TaskType};

/// Partial update applied by [`TaskStore::update`]. `None` fields are left
/// untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub result: Option<f64>,
    pub error: Option<String>,
}

impl TaskUpdate {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Completed with a result.
    pub fn completed(result: f64) -> Self {
        Self {
            status: Some(TaskStatus::Completed),
            result: Some(result),
            error: None,
        }
    }

    /// Failed with an error message.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(TaskStatus::Failed),
            result: None,
            error: Some(error.into()),
        }
    }

    /// Apply onto a task, refreshing `updated_at`.
    pub fn apply(self, task: &mut Task) {
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(result) = self.result {
            task.result = Some(result);
        }
        if let Some(error) = self.error {
            task.error = Some(error);
        }
        task.updated_at = Utc::now();
    }
}

/// Backend-agnostic task persistence.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new pending task.
    async fn create(
        &self,
        id: &str,
        task_type: TaskType,
        params: &[f64],
    ) -> Result<Task, DatabaseError>;

    /// Get a task by ID.
    async fn find_by_id(&self, id: &str) -> Result<Option<Task>, DatabaseError>;

    /// Get every task, oldest first.
    async fn find_all(&self) -> Result<Vec<Task>, DatabaseError>;

    /// Apply a partial update. Returns `None` if the task does not exist.
    async fn update(&self, id: &str, update: TaskUpdate) -> Result<Option<Task>, DatabaseError>;

    /// Apply a partial update only while the task is in `expected` status.
    /// The check and the write are atomic. Returns `None` if the task does
    /// not exist or is in another status.
    async fn update_if_status(
        &self,
        id: &str,
        expected: TaskStatus,
        update: TaskUpdate,
    ) -> Result<Option<Task>, DatabaseError>;

    async fn set_status(
        &self,
        id: &str,
        status: TaskStatus,
    ) -> Result<Option<Task>, DatabaseError> {
        self.update(id, TaskUpdate::status(status)).await
    }

    /// Record a result; implies Completed.
    async fn set_result(&self, id: &str, result: f64) -> Result<Option<Task>, DatabaseError> {
        self.update(id, TaskUpdate::completed(result)).await
    }

    /// Record an error message; implies Failed.
    async fn set_error(&self, id: &str, error: &str) -> Result<Option<Task>, DatabaseError> {
        self.update(id, TaskUpdate::failed(error)).await
    }
}
