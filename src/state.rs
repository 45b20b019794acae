//! Application state management

use std::sync::Arc;

use crate::config::Config;
use crate::tasks::TaskRegistry;
use crate::transfer::{RemoteFetcher, TransferController};
use crate::upload::{ChunkAssembler, ScratchStore, UploadError};
use crate::workspace::Workspace;

/// Error type for state initialization
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Failed to prepare workspace: {0}")]
    Workspace(#[from] std::io::Error),

    #[error("Failed to prepare scratch storage: {0}")]
    Scratch(#[from] UploadError),
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    controller: TransferController,
}

impl AppState {
    /// Create a new application state
    ///
    /// Creates the workspace root and resets scratch storage, so sessions
    /// from a previous process are discarded.
    pub async fn new(config: Config) -> Result<Self, StateError> {
        let workspace = Workspace::new(config.storage.workspace_root.clone());
        workspace.init().await?;

        let scratch = ScratchStore::new(config.storage.scratch_dir.clone());
        scratch.init().await?;

        let assembler = ChunkAssembler::with_limits(
            scratch,
            config.transfer.max_artifact_bytes,
            config.transfer.session_idle(),
        );
        let tasks = TaskRegistry::new(config.transfer.task_retention());
        let fetcher = RemoteFetcher::new(config.transfer.remote_timeout());

        let controller = TransferController::new(
            workspace,
            assembler,
            tasks,
            fetcher,
            config.transfer.sync_wait(),
        );

        Ok(Self {
            inner: Arc::new(AppStateInner { config, controller }),
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the transfer controller
    pub fn controller(&self) -> &TransferController {
        &self.inner.controller
    }

    /// Get the task registry
    pub fn tasks(&self) -> &TaskRegistry {
        self.inner.controller.tasks()
    }

    /// Start the idle-session and task-retention sweeps
    pub fn start_cleanup_tasks(&self) -> Vec<tokio::task::JoinHandle<()>> {
        let period = self.config().transfer.cleanup_interval();
        vec![
            self.controller().assembler().clone().start_cleanup_task(period),
            self.tasks().clone().start_cleanup_task(period),
        ]
    }
}
