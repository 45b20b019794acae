//! Task Registry
//!
//! Process-wide map from task ID to task state. Workers report updates,
//! clients poll snapshots. Critical sections are short and never await, so a
//! synchronous lock is used.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;

use super::types::{Task, TaskError, TaskId, TaskStatus, TaskUpdate};

/// Default retention for terminal tasks: 1 hour
pub const TASK_RETENTION_SECS: i64 = 60 * 60;

/// Shared registry of tracked operations
#[derive(Clone)]
pub struct TaskRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    tasks: RwLock<HashMap<TaskId, Task>>,
    retention: chrono::Duration,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new(chrono::Duration::seconds(TASK_RETENTION_SECS))
    }
}

impl TaskRegistry {
    /// Create a registry keeping terminal tasks for `retention`
    pub fn new(retention: chrono::Duration) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                tasks: RwLock::new(HashMap::new()),
                retention,
            }),
        }
    }

    /// Register a new running task
    pub fn create(&self, description: impl Into<String>) -> TaskId {
        let description = description.into();
        let mut tasks = self.inner.tasks.write();

        let mut id = TaskId::generate();
        while tasks.contains_key(&id) {
            id = TaskId::generate();
        }

        tracing::info!(task_id = %id, description = %description, "Task created");
        tasks.insert(id.clone(), Task::new(id.clone(), description));
        id
    }

    /// Apply an update reported by a worker.
    ///
    /// Terminal tasks are left untouched and their snapshot is returned.
    pub fn update(&self, id: &TaskId, update: TaskUpdate) -> Result<Task, TaskError> {
        let mut tasks = self.inner.tasks.write();
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| TaskError::TaskDoesNotExist(id.to_string()))?;

        if task.status.is_terminal() {
            tracing::warn!(
                task_id = %id,
                status = ?task.status,
                ignored = ?update.status(),
                "Ignoring update to finished task"
            );
            return Ok(task.clone());
        }

        task.status = update.status();
        task.updated_at = Utc::now();
        match update {
            TaskUpdate::Progress(note) => task.progress = Some(note),
            TaskUpdate::Completed(result) => task.result = Some(result),
            TaskUpdate::Failed(failure) => {
                tracing::warn!(
                    task_id = %id,
                    code = %failure.code,
                    message = %failure.message,
                    "Task failed"
                );
                task.failure = Some(failure);
            }
            TaskUpdate::Cancelled => {}
        }

        if task.status.is_terminal() {
            tracing::info!(task_id = %id, status = ?task.status, "Task finished");
        }

        Ok(task.clone())
    }

    /// Snapshot of a task
    pub fn get(&self, id: &str) -> Result<Task, TaskError> {
        let tasks = self.inner.tasks.read();
        tasks
            .get(id)
            .cloned()
            .ok_or_else(|| TaskError::TaskDoesNotExist(id.to_string()))
    }

    /// Mark a running task cancelled.
    ///
    /// Cancellation is advisory: the worker observes it before committing
    /// its result, but in-flight I/O is allowed to finish.
    pub fn cancel(&self, id: &str) -> Result<Task, TaskError> {
        let id = self.get(id)?.id;
        self.update(&id, TaskUpdate::Cancelled)
    }

    /// Attach the result of work that committed after its task was cancelled.
    ///
    /// The task stays cancelled; the result tells the client what was written.
    pub fn record_after_cancel(&self, id: &TaskId, result: Value) -> Result<Task, TaskError> {
        let mut tasks = self.inner.tasks.write();
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| TaskError::TaskDoesNotExist(id.to_string()))?;

        if task.status == TaskStatus::Cancelled && task.result.is_none() {
            tracing::warn!(task_id = %id, "Work committed after cancellation was requested");
            task.result = Some(result);
            task.progress = Some("Committed before cancellation took effect".to_string());
            task.updated_at = Utc::now();
        }

        Ok(task.clone())
    }

    /// Whether a task has been cancelled. Unknown tasks count as cancelled.
    pub fn is_cancelled(&self, id: &TaskId) -> bool {
        let tasks = self.inner.tasks.read();
        tasks
            .get(id)
            .map_or(true, |task| task.status == TaskStatus::Cancelled)
    }

    /// Remove a task. Removing an unknown ID is not an error.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.inner.tasks.write().remove(id).is_some();
        if removed {
            tracing::debug!(task_id = %id, "Task removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop terminal tasks last updated longer ago than the retention window
    pub fn purge_expired(&self) -> usize {
        let cutoff = Utc::now() - self.inner.retention;
        let mut tasks = self.inner.tasks.write();
        let before = tasks.len();
        tasks.retain(|_, task| !(task.status.is_terminal() && task.updated_at < cutoff));
        let purged = before - tasks.len();

        if purged > 0 {
            tracing::info!(count = purged, "Purged expired tasks");
        }

        purged
    }

    /// Start background retention task
    pub fn start_cleanup_task(self, period: std::time::Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);

            loop {
                interval.tick().await;
                self.purge_expired();
            }
        })
    }
}

impl std::borrow::Borrow<str> for TaskId {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}
