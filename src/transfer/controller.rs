//! Transfer Controller
//!
//! Owns the collaborators of an import or export and runs completion work as
//! tracked tasks. A request waits a bounded time for that work; if it is not
//! done by then the client receives the task reference instead.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::remote::RemoteFetcher;
use super::types::{Dispatched, ImportOutcome, TransferError};
use crate::tasks::{TaskId, TaskRegistry, TaskStatus, TaskUpdate};
use crate::upload::ChunkAssembler;
use crate::workspace::Workspace;

/// Default time a request waits for tracked work: 2 seconds
pub const SYNC_WAIT_MS: u64 = 2000;

/// Orchestrates imports and exports end-to-end
#[derive(Clone)]
pub struct TransferController {
    pub(super) inner: Arc<ControllerInner>,
}

pub(super) struct ControllerInner {
    pub(super) workspace: Workspace,
    pub(super) assembler: ChunkAssembler,
    pub(super) tasks: TaskRegistry,
    pub(super) fetcher: RemoteFetcher,
    pub(super) sync_wait: Duration,
}

impl TransferController {
    pub fn new(
        workspace: Workspace,
        assembler: ChunkAssembler,
        tasks: TaskRegistry,
        fetcher: RemoteFetcher,
        sync_wait: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                workspace,
                assembler,
                tasks,
                fetcher,
                sync_wait,
            }),
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.inner.workspace
    }

    pub fn assembler(&self) -> &ChunkAssembler {
        &self.inner.assembler
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.inner.tasks
    }

    /// Run `work` as a tracked task and wait up to the sync window for it.
    ///
    /// Work that finishes in time is answered directly and its task removed;
    /// otherwise the running task's snapshot is returned and the worker keeps
    /// reporting into the registry.
    pub(super) async fn run_tracked<F, Fut>(
        &self,
        description: String,
        work: F,
    ) -> Result<Dispatched, TransferError>
    where
        F: FnOnce(TaskId) -> Fut,
        Fut: Future<Output = Result<ImportOutcome, TransferError>> + Send + 'static,
    {
        let tasks = self.inner.tasks.clone();
        let task_id = tasks.create(description);

        let future = work(task_id.clone());
        let worker_tasks = tasks.clone();
        let worker_id = task_id.clone();
        let mut handle = tokio::spawn(async move {
            let result = future.await;
            let update = match &result {
                Ok(outcome) => match serde_json::to_value(outcome) {
                    Ok(value) => TaskUpdate::Completed(value),
                    Err(e) => TaskUpdate::Failed(TransferError::Internal(e.to_string()).to_failure()),
                },
                Err(e) => TaskUpdate::Failed(e.to_failure()),
            };
            let committed = match &update {
                TaskUpdate::Completed(value) => Some(value.clone()),
                _ => None,
            };
            match worker_tasks.update(&worker_id, update) {
                Ok(task) if task.status == TaskStatus::Cancelled => {
                    if let Some(value) = committed {
                        let _ = worker_tasks.record_after_cancel(&worker_id, value);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(task_id = %worker_id, error = %e, "Task removed before completion");
                }
            }
            result
        });

        match tokio::time::timeout(self.inner.sync_wait, &mut handle).await {
            Ok(joined) => {
                tasks.remove(task_id.as_str());
                let outcome = joined.map_err(|e| TransferError::Internal(e.to_string()))??;
                Ok(Dispatched::Done(outcome))
            }
            Err(_) => {
                let task = tasks.get(task_id.as_str())?;
                tracing::info!(task_id = %task_id, "Tracked work continues in the background");
                Ok(Dispatched::Tracked(task))
            }
        }
    }

    /// Fail with `Cancelled` if the task was cancelled or removed
    pub(super) fn ensure_active(&self, task_id: &TaskId) -> Result<(), TransferError> {
        if self.inner.tasks.is_cancelled(task_id) {
            tracing::info!(task_id = %task_id, "Honoring cancellation before commit");
            return Err(TransferError::Cancelled(task_id.to_string()));
        }
        Ok(())
    }

    /// Record a progress note; the task may already be gone
    pub(super) fn report_progress(&self, task_id: &TaskId, note: impl Into<String>) {
        let _ = self
            .inner
            .tasks
            .update(task_id, TaskUpdate::Progress(note.into()));
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::ImportResult;
    use tempfile::TempDir;

    fn outcome() -> ImportOutcome {
        ImportOutcome {
            result: ImportResult::Stored,
            location: "/file/a.txt".into(),
            path: "a.txt".into(),
            bytes: 1,
            sha256: String::new(),
            entries: None,
        }
    }

    #[tokio::test]
    async fn test_fast_work_is_answered_directly() {
        let temp_dir = TempDir::new().unwrap();
        let controller = test_support::controller(&temp_dir, Duration::from_secs(5)).await;

        let dispatched = controller
            .run_tracked("fast".into(), |_| async { Ok(outcome()) })
            .await
            .unwrap();

        assert!(matches!(dispatched, Dispatched::Done(_)));
        assert!(controller.tasks().is_empty());
    }

    #[tokio::test]
    async fn test_fast_failure_is_returned() {
        let temp_dir = TempDir::new().unwrap();
        let controller = test_support::controller(&temp_dir, Duration::from_secs(5)).await;

        let result = controller
            .run_tracked("failing".into(), |_| async {
                Err(TransferError::InvalidArchive("junk".into()))
            })
            .await;

        assert!(matches!(result, Err(TransferError::InvalidArchive(_))));
        assert!(controller.tasks().is_empty());
    }

    #[tokio::test]
    async fn test_slow_work_is_tracked() {
        let temp_dir = TempDir::new().unwrap();
        let controller = test_support::controller(&temp_dir, Duration::from_millis(10)).await;

        let dispatched = controller
            .run_tracked("slow".into(), |_| async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(outcome())
            })
            .await
            .unwrap();

        let Dispatched::Tracked(task) = dispatched else {
            panic!("expected a tracked task");
        };
        assert_eq!(task.status, TaskStatus::Running);

        tokio::time::sleep(Duration::from_millis(500)).await;
        let task = controller.tasks().get(task.id.as_str()).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result.unwrap()["result"], "stored");
    }

    #[tokio::test]
    async fn test_cancelled_work_does_not_commit() {
        let temp_dir = TempDir::new().unwrap();
        let controller = test_support::controller(&temp_dir, Duration::from_millis(10)).await;

        let worker = controller.clone();
        let dispatched = controller
            .run_tracked("cancellable".into(), move |task_id| async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                worker.ensure_active(&task_id)?;
                Ok(outcome())
            })
            .await
            .unwrap();

        let Dispatched::Tracked(task) = dispatched else {
            panic!("expected a tracked task");
        };
        controller.tasks().cancel(task.id.as_str()).unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        let task = controller.tasks().get(task.id.as_str()).unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert!(task.result.is_none());
    }

    #[tokio::test]
    async fn test_commit_after_cancel_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let controller = test_support::controller(&temp_dir, Duration::from_millis(10)).await;

        let dispatched = controller
            .run_tracked("uncheckpointed".into(), |_| async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(outcome())
            })
            .await
            .unwrap();

        let Dispatched::Tracked(task) = dispatched else {
            panic!("expected a tracked task");
        };
        controller.tasks().cancel(task.id.as_str()).unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        let task = controller.tasks().get(task.id.as_str()).unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert_eq!(task.result.unwrap()["path"], "a.txt");
    }
}
