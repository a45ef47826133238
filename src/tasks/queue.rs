//! In-memory FIFO of pending tasks.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tracing::debug;

use super::model::Task;

/// Unbounded FIFO shared between the submission path and the processor.
///
/// The queue holds snapshots only; the store stays authoritative for task
/// status, so a dequeued task must be re-read before it is acted on.
pub struct TaskQueue {
    tasks: Mutex<VecDeque<Task>>,
    available: Notify,
}

impl TaskQueue {
    /// Create a new task queue.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tasks: Mutex::new(VecDeque::new()),
            available: Notify::new(),
        })
    }

    /// Append a task and signal availability.
    pub async fn enqueue(&self, task: Task) {
        let task_id = task.id.clone();
        let size = {
            let mut tasks = self.tasks.lock().await;
            tasks.push_back(task);
            tasks.len()
        };
        debug!(task_id = %task_id, size, "Task enqueued");
        self.available.notify_one();
    }

    /// Put a task back at the head, ahead of everything else.
    pub async fn requeue_front(&self, task: Task) {
        let task_id = task.id.clone();
        let size = {
            let mut tasks = self.tasks.lock().await;
            tasks.push_front(task);
            tasks.len()
        };
        debug!(task_id = %task_id, size, "Task requeued at head");
    }

    /// Remove and return the front task.
    pub async fn dequeue(&self) -> Option<Task> {
        let mut tasks = self.tasks.lock().await;
        let task = tasks.pop_front()?;
        debug!(task_id = %task.id, size = tasks.len(), "Task dequeued");
        Some(task)
    }

    /// Read the front task without removing it.
    pub async fn peek(&self) -> Option<Task> {
        self.tasks.lock().await.front().cloned()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.lock().await.is_empty()
    }

    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Copy of the current contents, front first.
    pub async fn snapshot(&self) -> Vec<Task> {
        self.tasks.lock().await.iter().cloned().collect()
    }

    /// Resolves on the next enqueue signal. A signal sent while nobody was
    /// waiting is kept, so an enqueue is never missed between two waits.
    pub async fn notified(&self) {
        self.available.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::tasks::model::TaskType;

    fn make_task(id: &str) -> Task {
        Task::new(id, TaskType::Sum, vec![1.0, 2.0])
    }

    #[tokio::test]
    async fn fifo_order() {
        let queue = TaskQueue::new();
        assert!(queue.is_empty().await);
        assert!(queue.dequeue().await.is_none());

        queue.enqueue(make_task("a")).await;
        queue.enqueue(make_task("b")).await;
        queue.enqueue(make_task("c")).await;
        assert_eq!(queue.len().await, 3);

        assert_eq!(queue.dequeue().await.unwrap().id, "a");
        assert_eq!(queue.dequeue().await.unwrap().id, "b");
        assert_eq!(queue.dequeue().await.unwrap().id, "c");
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn peek_does_not_remove() {
        let queue = TaskQueue::new();
        assert!(queue.peek().await.is_none());

        queue.enqueue(make_task("a")).await;
        assert_eq!(queue.peek().await.unwrap().id, "a");
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn requeue_front_goes_ahead() {
        let queue = TaskQueue::new();
        queue.enqueue(make_task("a")).await;
        queue.enqueue(make_task("b")).await;

        let head = queue.dequeue().await.unwrap();
        queue.requeue_front(head).await;

        let ids: Vec<String> = queue.snapshot().await.into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn snapshot_is_a_copy() {
        let queue = TaskQueue::new();
        queue.enqueue(make_task("a")).await;

        let snapshot = queue.snapshot().await;
        queue.dequeue().await;

        assert_eq!(snapshot.len(), 1);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn enqueue_signals_waiter() {
        let queue = TaskQueue::new();
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.notified().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.enqueue(make_task("a")).await;

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter was not woken")
            .unwrap();
    }

    #[tokio::test]
    async fn concurrent_producer_and_consumer() {
        let queue = TaskQueue::new();
        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                for i in 0..100 {
                    queue.enqueue(make_task(&i.to_string())).await;
                }
            })
        };

        let mut seen = Vec::new();
        while seen.len() < 100 {
            match queue.dequeue().await {
                Some(task) => seen.push(task.id.parse::<usize>().unwrap()),
                None => tokio::task::yield_now().await,
            }
        }
        producer.await.unwrap();

        assert_eq!(seen, (0..100).collect::<Vec<_>>());
    }
}
