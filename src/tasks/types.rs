//! Task types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque task identifier, unique for the lifetime of the registry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal statuses never change again
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Running)
    }
}

/// Failure detail recorded on a failed task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    /// Machine-readable error code, e.g. `INVALID_ARCHIVE`
    pub code: String,
    pub message: String,
    /// HTTP status the failure maps to
    pub status: u16,
}

/// Snapshot of one tracked operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    pub status: TaskStatus,

    /// Latest progress note from the worker
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<TaskFailure>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub(crate) fn new(id: TaskId, description: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            description,
            status: TaskStatus::Running,
            progress: None,
            result: None,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A change reported by the worker executing a task
#[derive(Debug, Clone)]
pub enum TaskUpdate {
    /// Still running; replaces the progress note
    Progress(String),
    Completed(serde_json::Value),
    Failed(TaskFailure),
    Cancelled,
}

impl TaskUpdate {
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskUpdate::Progress(_) => TaskStatus::Running,
            TaskUpdate::Completed(_) => TaskStatus::Completed,
            TaskUpdate::Failed(_) => TaskStatus::Failed,
            TaskUpdate::Cancelled => TaskStatus::Cancelled,
        }
    }
}

/// Task registry errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("Task does not exist: {0}")]
    TaskDoesNotExist(String),
}

impl TaskError {
    /// The identifier the failing call was made with
    pub fn task_id(&self) -> &str {
        match self {
            TaskError::TaskDoesNotExist(id) => id,
        }
    }
}
