//! In-memory `TaskStore`, used when no database path is set.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::DatabaseError;
use crate::store::traits::{TaskStore, TaskUpdate};
use crate::tasks::model::{Task, TaskStatus, TaskType};

/// Task store kept in a process-local map. Nothing survives a restart.
#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<String, Task>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(
        &self,
        id: &str,
        task_type: TaskType,
        params: &[f64],
    ) -> Result<Task, DatabaseError> {
        let task = Task::new(id, task_type, params.to_vec());
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(id) {
            return Err(DatabaseError::Query(format!("create: task {id} already exists")));
        }
        tasks.insert(id.to_string(), task.clone());
        debug!(task_id = %id, task_type = %task_type, "Task created in memory store");
        Ok(task)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Task>, DatabaseError> {
        Ok(self.tasks.read().await.get(id).cloned())
    }

    async fn find_all(&self) -> Result<Vec<Task>, DatabaseError> {
        let mut all: Vec<Task> = self.tasks.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }

    async fn update(&self, id: &str, update: TaskUpdate) -> Result<Option<Task>, DatabaseError> {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(id) else {
            debug!(task_id = %id, "Task not found for update");
            return Ok(None);
        };
        update.apply(task);
        Ok(Some(task.clone()))
    }

    async fn update_if_status(
        &self,
        id: &str,
        expected: TaskStatus,
        update: TaskUpdate,
    ) -> Result<Option<Task>, DatabaseError> {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(id) {
            Some(task) if task.status == expected => {
                update.apply(task);
                Ok(Some(task.clone()))
            }
            Some(task) => {
                debug!(task_id = %id, status = %task.status, expected = %expected, "Conditional update skipped");
                Ok(None)
            }
            None => Ok(None),
        }
    }
}
