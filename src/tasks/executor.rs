//! Drives one task through Pending, Processing and a terminal status.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{error, info, warn};

use super::events::EventBus;
use super::handlers::HandlerRegistry;
use super::model::{Task, TaskStatus};
use crate::config::{LoadThresholds, TaskConfig};
use crate::error::TaskError;
use crate::load::LoadProbe;
use crate::store::{TaskStore, TaskUpdate};

/// Dependencies shared by every execution.
#[derive(Clone)]
pub struct ExecutorDeps {
    pub store: Arc<dyn TaskStore>,
    pub events: Arc<EventBus>,
    pub handlers: Arc<HandlerRegistry>,
    pub probe: Arc<dyn LoadProbe>,
}

/// Runs tasks through their state machine.
///
/// Every status change is written to the store before it is published, so a
/// subscriber never sees a state that is not durable yet.
pub struct TaskExecutor {
    deps: ExecutorDeps,
    thresholds: LoadThresholds,
    delay_min: Duration,
    delay_max: Duration,
}

impl TaskExecutor {
    pub fn new(deps: ExecutorDeps, config: &TaskConfig) -> Self {
        Self {
            deps,
            thresholds: config.thresholds,
            delay_min: config.processing_delay_min.min(config.processing_delay_max),
            delay_max: config.processing_delay_max.max(config.processing_delay_min),
        }
    }

    /// Execute one task.
    ///
    /// Returns the terminal task, whether it completed or failed. Errors are
    /// reserved for attempts that left the task untouched (`NotFound`,
    /// `InvalidTransition`, `Overloaded`) and for storage failures, after
    /// which the stored state must be reconciled by hand.
    pub async fn execute(&self, task: &Task) -> Result<Task, TaskError> {
        info!(task_id = %task.id, task_type = %task.task_type, "Starting task processing");

        let current = self
            .deps
            .store
            .find_by_id(&task.id)
            .await?
            .ok_or_else(|| TaskError::NotFound {
                id: task.id.clone(),
            })?;

        if !current.status.can_transition_to(TaskStatus::Processing) {
            return Err(TaskError::InvalidTransition {
                id: current.id,
                from: current.status,
                to: TaskStatus::Processing,
            });
        }

        if self.deps.probe.check(self.thresholds).await {
            warn!(task_id = %current.id, "Server is overloaded, leaving task pending");
            return Err(TaskError::Overloaded);
        }

        // A concurrent attempt that claimed the task first makes this fail
        // with `InvalidTransition`.
        let processing = self
            .persist_and_publish(
                &current.id,
                TaskStatus::Pending,
                TaskUpdate::status(TaskStatus::Processing),
            )
            .await?;

        tokio::time::sleep(self.work_delay()).await;

        let update = match self
            .deps
            .handlers
            .dispatch(processing.task_type, &processing.params)
            .await
        {
            Ok(result) => {
                info!(task_id = %processing.id, result, "Task completed");
                TaskUpdate::completed(result)
            }
            Err(e) => {
                error!(task_id = %processing.id, error = %e, "Error processing task");
                TaskUpdate::failed(e.to_string())
            }
        };

        self.persist_and_publish(&processing.id, TaskStatus::Processing, update)
            .await
    }

    /// Random delay within the configured bounds.
    fn work_delay(&self) -> Duration {
        let min = self.delay_min.as_millis() as u64;
        let max = self.delay_max.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    /// Write `update` if the task is still in `expected` status, then publish.
    async fn persist_and_publish(
        &self,
        id: &str,
        expected: TaskStatus,
        update: TaskUpdate,
    ) -> Result<Task, TaskError> {
        let target = update.status.unwrap_or(expected);
        let written = self
            .deps
            .store
            .update_if_status(id, expected, update)
            .await
            .inspect_err(|e| {
                error!(task_id = %id, status = %target, error = %e, "Failed to persist task update");
            })?;

        let Some(task) = written else {
            return Err(self.rejected_transition(id, target).await);
        };
        self.deps.events.publish(&task).await;
        Ok(task)
    }

    /// Explain why a guarded write matched nothing.
    async fn rejected_transition(&self, id: &str, to: TaskStatus) -> TaskError {
        match self.deps.store.find_by_id(id).await {
            Ok(Some(task)) => {
                warn!(task_id = %id, status = %task.status, to = %to, "Task changed status concurrently");
                TaskError::InvalidTransition {
                    id: id.to_string(),
                    from: task.status,
                    to,
                }
            }
            Ok(None) => TaskError::NotFound { id: id.to_string() },
            Err(e) => e.into(),
        }
    }
}
