//! Load-aware scheduling loop feeding the executor.
//!
//! The loop wakes on a fixed interval and on every enqueue. Each wake runs a
//! drain pass: scheduling cycles repeat until one of them does not dispatch.
//! Before dequeuing, every cycle consults the load probe; while the system is
//! overloaded the head of the queue is left where it is and the next tick
//! retries.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::executor::TaskExecutor;
use super::model::{Task, TaskStatus};
use super::queue::TaskQueue;
use crate::config::{DispatchMode, LoadThresholds, TaskConfig};
use crate::error::TaskError;
use crate::load::LoadProbe;
use crate::store::TaskStore;

/// What a single scheduling cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Queue was empty.
    Idle,
    /// The in-flight limit is reached; nothing dequeued.
    Saturated,
    /// Load probe reported overload; head of the queue untouched.
    Deferred,
    /// Dequeued task was missing or no longer Pending.
    Skipped,
    /// Task handed to the executor.
    Dispatched,
}

/// Tasks left in the queue when the processor stopped.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Still Pending in the store; a later process can pick them up.
    pub pending: Vec<Task>,
}

/// Handle to a running processor loop.
pub struct ProcessorHandle {
    token: CancellationToken,
    handle: JoinHandle<ShutdownReport>,
    queue: Arc<TaskQueue>,
}

impl ProcessorHandle {
    /// Stop scheduling, wait for in-flight executions, and report what is
    /// still queued.
    pub async fn shutdown(self) -> ShutdownReport {
        self.token.cancel();
        match self.handle.await {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "Processor loop terminated abnormally");
                ShutdownReport {
                    pending: self.queue.snapshot().await,
                }
            }
        }
    }
}

pub struct TaskProcessor {
    queue: Arc<TaskQueue>,
    store: Arc<dyn TaskStore>,
    executor: Arc<TaskExecutor>,
    probe: Arc<dyn LoadProbe>,
    thresholds: LoadThresholds,
    check_interval: Duration,
    dispatch: DispatchMode,
    draining: AtomicBool,
    token: CancellationToken,
}

impl TaskProcessor {
    pub fn new(
        queue: Arc<TaskQueue>,
        store: Arc<dyn TaskStore>,
        executor: Arc<TaskExecutor>,
        probe: Arc<dyn LoadProbe>,
        config: &TaskConfig,
    ) -> Self {
        Self {
            queue,
            store,
            executor,
            probe,
            thresholds: config.thresholds,
            check_interval: config.queue_check_interval,
            dispatch: config.dispatch,
            draining: AtomicBool::new(false),
            token: CancellationToken::new(),
        }
    }

    /// Start the scheduling loop on the runtime.
    pub fn spawn(self: Arc<Self>) -> ProcessorHandle {
        let token = self.token.clone();
        let queue = Arc::clone(&self.queue);
        info!(
            interval_ms = self.check_interval.as_millis() as u64,
            dispatch = ?self.dispatch,
            "Task processor started"
        );
        let handle = tokio::spawn(async move { self.run().await });
        ProcessorHandle {
            token,
            handle,
            queue,
        }
    }

    async fn run(self: Arc<Self>) -> ShutdownReport {
        let mut ticker = tokio::time::interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    log_join(joined);
                }
                _ = self.queue.notified() => {}
                _ = ticker.tick() => {}
            }
            self.drain(&mut in_flight).await;
        }

        if !in_flight.is_empty() {
            info!(
                in_flight = in_flight.len(),
                "Waiting for in-flight executions to finish"
            );
        }
        while let Some(joined) = in_flight.join_next().await {
            log_join(joined);
        }

        let pending = self.queue.snapshot().await;
        for task in &pending {
            warn!(task_id = %task.id, task_type = %task.task_type, "Task still pending at shutdown");
        }
        info!(pending = pending.len(), "Task processor stopped");
        ShutdownReport { pending }
    }

    /// Run cycles until one does not dispatch. Returns how many tasks were
    /// dispatched. A pass already in progress makes this a no-op.
    pub async fn drain(&self, in_flight: &mut JoinSet<()>) -> usize {
        if self.draining.swap(true, Ordering::AcqRel) {
            debug!("Drain already in progress");
            return 0;
        }

        let mut dispatched = 0;
        while !self.token.is_cancelled() {
            match self.run_cycle(in_flight).await {
                CycleOutcome::Dispatched => dispatched += 1,
                _ => break,
            }
        }

        self.draining.store(false, Ordering::Release);
        dispatched
    }

    /// One scheduling cycle.
    pub async fn run_cycle(&self, in_flight: &mut JoinSet<()>) -> CycleOutcome {
        if self.queue.is_empty().await {
            return CycleOutcome::Idle;
        }

        if let DispatchMode::Concurrent { max_in_flight } = self.dispatch
            && in_flight.len() >= max_in_flight
        {
            debug!(in_flight = in_flight.len(), "In-flight limit reached");
            return CycleOutcome::Saturated;
        }

        if self.probe.check(self.thresholds).await {
            let queued = self.queue.len().await;
            info!(queued, "System overloaded, deferring queue processing");
            return CycleOutcome::Deferred;
        }

        let Some(queued) = self.queue.dequeue().await else {
            return CycleOutcome::Idle;
        };

        let task = match self.store.find_by_id(&queued.id).await {
            Ok(Some(task)) if task.status == TaskStatus::Pending => task,
            Ok(Some(task)) => {
                debug!(task_id = %task.id, status = %task.status, "Skipping task that is no longer pending");
                return CycleOutcome::Skipped;
            }
            Ok(None) => {
                warn!(task_id = %queued.id, "Queued task no longer exists");
                return CycleOutcome::Skipped;
            }
            Err(e) => {
                error!(task_id = %queued.id, error = %e, "Failed to load queued task, retrying later");
                self.queue.requeue_front(queued).await;
                return CycleOutcome::Deferred;
            }
        };

        match self.dispatch {
            DispatchMode::Serial => {
                let result = self.executor.execute(&task).await;
                if settle(&self.queue, task, result).await {
                    return CycleOutcome::Deferred;
                }
            }
            DispatchMode::Concurrent { .. } => {
                let executor = Arc::clone(&self.executor);
                let queue = Arc::clone(&self.queue);
                in_flight.spawn(async move {
                    let result = executor.execute(&task).await;
                    settle(&queue, task, result).await;
                });
            }
        }
        CycleOutcome::Dispatched
    }
}

/// Handle an execution result. Returns true when the task went back on the
/// queue.
async fn settle(queue: &TaskQueue, task: Task, result: Result<Task, TaskError>) -> bool {
    match result {
        Ok(done) => {
            debug!(task_id = %done.id, status = %done.status, "Execution finished");
            false
        }
        Err(e) if e.is_retryable() => {
            info!(task_id = %task.id, error = %e, "Execution deferred, requeued at head");
            queue.requeue_front(task).await;
            true
        }
        Err(e @ TaskError::Storage(_)) => {
            error!(
                task_id = %task.id,
                error = %e,
                "Storage failure during execution, task needs manual reconciliation"
            );
            false
        }
        Err(e) => {
            warn!(task_id = %task.id, error = %e, "Execution skipped");
            false
        }
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "Task execution panicked");
    }
}
