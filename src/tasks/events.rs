//! Per-task event bus.

use std::collections::HashMap;

use tokio::sync::{RwLock, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use super::model::Task;

/// Stream of task states for one task. Ends after the terminal state has been
/// delivered. Dropping it unsubscribes.
pub type TaskEventStream = UnboundedReceiverStream<Task>;

/// Registry of active subscribers keyed by task id.
///
/// Delivery is to currently attached subscribers only; nothing is buffered for
/// late subscribers. Once a terminal state is published the task's entry is
/// removed, which closes every stream attached to it.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<HashMap<String, Vec<mpsc::UnboundedSender<Task>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new subscriber to a task.
    pub async fn subscribe(&self, task_id: &str) -> TaskEventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self.subscribers.write().await;
        subscribers.entry(task_id.to_string()).or_default().push(tx);
        debug!(
            task_id = %task_id,
            subscribers = subscribers.get(task_id).map(Vec::len).unwrap_or(0),
            "Task subscriber attached"
        );
        UnboundedReceiverStream::new(rx)
    }

    /// Broadcast the full task state to the task's subscribers. Returns the
    /// number of subscribers that received it.
    pub async fn publish(&self, task: &Task) -> usize {
        let mut subscribers = self.subscribers.write().await;

        let delivered = match subscribers.get_mut(&task.id) {
            Some(senders) => {
                senders.retain(|tx| tx.send(task.clone()).is_ok());
                senders.len()
            }
            None => 0,
        };

        let drop_entry = task.is_terminal()
            || subscribers
                .get(&task.id)
                .is_some_and(|senders| senders.is_empty());
        if drop_entry {
            subscribers.remove(&task.id);
        }

        debug!(
            task_id = %task.id,
            status = %task.status,
            delivered,
            "Task event published"
        );
        delivered
    }

    /// Drop closed subscribers of a task, removing the entry when none remain.
    pub async fn prune(&self, task_id: &str) {
        let mut subscribers = self.subscribers.write().await;
        if let Some(senders) = subscribers.get_mut(task_id) {
            senders.retain(|tx| !tx.is_closed());
            if senders.is_empty() {
                subscribers.remove(task_id);
            }
        }
    }

    /// Number of live subscribers for a task.
    pub async fn subscriber_count(&self, task_id: &str) -> usize {
        self.subscribers
            .read()
            .await
            .get(task_id)
            .map(|senders| senders.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Number of tasks with at least one registered subscriber.
    pub async fn tracked_tasks(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// A stream that is already finished.
    pub fn closed_stream() -> TaskEventStream {
        let (_, rx) = mpsc::unbounded_channel();
        UnboundedReceiverStream::new(rx)
    }
}
