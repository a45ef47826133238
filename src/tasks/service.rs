//! Submission and query boundary over the pipeline.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{info, warn};
use uuid::Uuid;

use super::cache::DedupCache;
use super::events::{EventBus, TaskEventStream};
use super::executor::{ExecutorDeps, TaskExecutor};
use super::handlers::HandlerRegistry;
use super::model::{NewTask, Task, TaskResultView, TaskStatus};
use super::processor::TaskProcessor;
use super::queue::TaskQueue;
use crate::config::TaskConfig;
use crate::error::TaskError;
use crate::load::LoadProbe;
use crate::store::TaskStore;

/// Fully wired pipeline: the service for callers and the processor to spawn.
pub struct Pipeline {
    pub service: Arc<TaskService>,
    pub processor: Arc<TaskProcessor>,
}

impl Pipeline {
    pub fn build(
        store: Arc<dyn TaskStore>,
        probe: Arc<dyn LoadProbe>,
        handlers: HandlerRegistry,
        config: &TaskConfig,
    ) -> Self {
        let queue = TaskQueue::new();
        let events = Arc::new(EventBus::new());
        let handlers = Arc::new(handlers);
        let executor = Arc::new(TaskExecutor::new(
            ExecutorDeps {
                store: Arc::clone(&store),
                events: Arc::clone(&events),
                handlers: Arc::clone(&handlers),
                probe: Arc::clone(&probe),
            },
            config,
        ));

        let processor = Arc::new(TaskProcessor::new(
            Arc::clone(&queue),
            Arc::clone(&store),
            Arc::clone(&executor),
            probe,
            config,
        ));
        let service = Arc::new(TaskService {
            store,
            cache: DedupCache::new(),
            queue,
            events,
            handlers,
            executor,
            submit_lock: Mutex::new(()),
        });

        Self { service, processor }
    }
}

pub struct TaskService {
    store: Arc<dyn TaskStore>,
    cache: DedupCache,
    queue: Arc<TaskQueue>,
    events: Arc<EventBus>,
    handlers: Arc<HandlerRegistry>,
    executor: Arc<TaskExecutor>,
    /// Serializes dedup lookup, creation and cache registration.
    submit_lock: Mutex<()>,
}

impl TaskService {
    /// Submit a task, or return the task already created for the same
    /// `(type, params)`.
    pub async fn create_task(&self, new_task: NewTask) -> Result<Task, TaskError> {
        let NewTask { task_type, params } = new_task;
        if !self.handlers.has(task_type).await {
            return Err(TaskError::InvalidTaskType {
                task_type: task_type.to_string(),
            });
        }

        let task = {
            let _guard = self.submit_lock.lock().await;

            if let Some(existing_id) = self.cache.get(task_type, &params).await {
                match self.store.find_by_id(&existing_id).await? {
                    Some(existing) => {
                        info!(task_id = %existing.id, status = %existing.status, "Duplicate submission, returning existing task");
                        return Ok(existing);
                    }
                    None => {
                        warn!(task_id = %existing_id, "Cached task no longer exists, creating a new one");
                    }
                }
            }

            let id = Uuid::new_v4().to_string();
            let task = self.store.create(&id, task_type, &params).await?;
            self.cache.set(task_type, &params, id).await;
            task
        };

        self.queue.enqueue(task.clone()).await;
        self.events.publish(&task).await;
        info!(task_id = %task.id, task_type = %task.task_type, "Task created");
        Ok(task)
    }

    pub async fn get_task(&self, id: &str) -> Result<Option<Task>, TaskError> {
        Ok(self.store.find_by_id(id).await?)
    }

    async fn require(&self, id: &str) -> Result<Task, TaskError> {
        self.get_task(id)
            .await?
            .ok_or_else(|| TaskError::NotFound { id: id.to_string() })
    }

    pub async fn get_status(&self, id: &str) -> Result<TaskStatus, TaskError> {
        Ok(self.require(id).await?.status)
    }

    /// The outcome of a task, or a "not completed" view while it is running.
    pub async fn get_result(&self, id: &str) -> Result<TaskResultView, TaskError> {
        Ok(TaskResultView::from_task(&self.require(id).await?))
    }

    pub async fn list_tasks(&self) -> Result<Vec<Task>, TaskError> {
        Ok(self.store.find_all().await?)
    }

    /// Live state changes of one task.
    ///
    /// A task that is already terminal yields a stream that ends immediately;
    /// its outcome is available through [`get_result`](Self::get_result).
    pub async fn subscribe(&self, id: &str) -> Result<TaskEventStream, TaskError> {
        // Attach before reading, so a transition between the two is not lost.
        let stream = self.events.subscribe(id).await;

        let current = match self.store.find_by_id(id).await {
            Ok(current) => current,
            Err(e) => {
                drop(stream);
                self.events.prune(id).await;
                return Err(e.into());
            }
        };

        match current {
            Some(task) if !task.is_terminal() => Ok(stream),
            Some(_) => {
                // A closed channel means the terminal publish already reached
                // this subscriber and detached it; its events are buffered.
                let rx = stream.into_inner();
                if rx.is_closed() {
                    return Ok(UnboundedReceiverStream::new(rx));
                }
                drop(rx);
                self.events.prune(id).await;
                Ok(EventBus::closed_stream())
            }
            None => {
                drop(stream);
                self.events.prune(id).await;
                Err(TaskError::NotFound { id: id.to_string() })
            }
        }
    }

    /// Execute a task immediately, bypassing the queue. The queued copy is
    /// skipped when the processor reaches it.
    pub async fn execute_now(&self, id: &str) -> Result<Task, TaskError> {
        let task = self.require(id).await?;
        info!(task_id = %id, "Forced execution requested");
        self.executor.execute(&task).await
    }

    /// Re-enqueue tasks left Pending by a previous process and re-register
    /// every stored fingerprint. Returns how many tasks were queued.
    ///
    /// Tasks found in Processing were interrupted mid-execution; they are
    /// logged and left for manual reconciliation.
    pub async fn recover_pending(&self) -> Result<usize, TaskError> {
        let _guard = self.submit_lock.lock().await;
        let tasks = self.store.find_all().await?;

        let mut queued = 0;
        for task in tasks {
            // Oldest first, so the newest task wins a shared fingerprint.
            self.cache
                .set(task.task_type, &task.params, task.id.clone())
                .await;
            match task.status {
                TaskStatus::Pending => {
                    self.queue.enqueue(task).await;
                    queued += 1;
                }
                TaskStatus::Processing => {
                    warn!(task_id = %task.id, "Task was interrupted while processing, needs manual reconciliation");
                }
                TaskStatus::Completed | TaskStatus::Failed => {}
            }
        }

        if queued > 0 {
            info!(queued, "Recovered pending tasks");
        }
        Ok(queued)
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.len().await
    }
}
