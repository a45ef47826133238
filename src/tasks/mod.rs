//! Admission-controlled task pipeline.

pub mod cache;
pub mod events;
pub mod executor;
pub mod handlers;
pub mod model;
pub mod processor;
pub mod queue;
pub mod routes;
pub mod service;

pub use cache::DedupCache;
pub use events::{EventBus, TaskEventStream};
pub use executor::{ExecutorDeps, TaskExecutor};
pub use handlers::{HandlerRegistry, TaskHandler};
pub use model::{NewTask, Task, TaskResultView, TaskStatus, TaskType};
pub use processor::{CycleOutcome, ProcessorHandle, ShutdownReport, TaskProcessor};
pub use queue::TaskQueue;
pub use routes::task_routes;
pub use service::{Pipeline, TaskService};
