//! Task types, statuses and the query-side result view.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TaskError;

/// Kind of computation a task requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    /// Sum of all params.
    Sum,
    /// Product of all params.
    Multiply,
}

impl TaskType {
    /// Wire name of the type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Multiply => "multiply",
        }
    }

    /// Whether the result is independent of param order.
    pub fn is_commutative(&self) -> bool {
        matches!(self, Self::Sum | Self::Multiply)
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sum" => Ok(Self::Sum),
            "multiply" => Ok(Self::Multiply),
            other => Err(TaskError::InvalidTaskType {
                task_type: other.to_string(),
            }),
        }
    }
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Waiting in the queue.
    Pending,
    /// Picked up by the executor.
    Processing,
    /// Finished with a result.
    Completed,
    /// Finished with an error.
    Failed,
}

impl TaskStatus {
    /// Check if this status allows transitioning to another status.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        use TaskStatus::*;

        matches!(
            (self, target),
            (Pending, Processing) | (Processing, Completed) | (Processing, Failed)
        )
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// One unit of requested computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub params: Vec<f64>,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a new pending task.
    pub fn new(id: impl Into<String>, task_type: TaskType, params: Vec<f64>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            task_type,
            params,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// A submission request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub params: Vec<f64>,
}

impl NewTask {
    pub fn new(task_type: TaskType, params: Vec<f64>) -> Self {
        Self { task_type, params }
    }
}

/// What a result query returns for a known task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskResultView {
    Completed { result: f64 },
    Failed { error: String },
    /// The task has not reached a terminal status yet.
    NotCompleted { status: TaskStatus },
}

impl TaskResultView {
    /// Derive the view from the current task state. A non-terminal task never
    /// exposes a result, even if one is somehow present.
    pub fn from_task(task: &Task) -> Self {
        match task.status {
            TaskStatus::Completed => match task.result {
                Some(result) => Self::Completed { result },
                None => Self::NotCompleted {
                    status: task.status,
                },
            },
            TaskStatus::Failed => Self::Failed {
                error: task
                    .error
                    .clone()
                    .unwrap_or_else(|| "Unknown error during task processing".to_string()),
            },
            status => Self::NotCompleted { status },
        }
    }

    pub fn status(&self) -> TaskStatus {
        match self {
            Self::Completed { .. } => TaskStatus::Completed,
            Self::Failed { .. } => TaskStatus::Failed,
            Self::NotCompleted { status } => *status,
        }
    }
}
