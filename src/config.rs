//! Configuration management for the transfer server

use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::tasks::TASK_RETENTION_SECS;
use crate::transfer::{REMOTE_TIMEOUT_SECS, SYNC_WAIT_MS};
use crate::upload::{MAX_ARTIFACT_SIZE, SESSION_IDLE_SECS};

/// Default request body limit: 64MB
pub const MAX_REQUEST_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub transfer: TransferConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest request body accepted by any route
    pub max_request_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root of the file tree imports write into
    pub workspace_root: PathBuf,
    /// Scratch area for partial uploads, wiped on startup
    pub scratch_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransferConfig {
    pub session_idle_secs: i64,
    pub remote_timeout_secs: u64,
    pub task_retention_secs: i64,
    pub sync_wait_ms: u64,
    pub max_artifact_bytes: u64,
    pub cleanup_interval_secs: u64,
}

impl TransferConfig {
    pub fn session_idle(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_idle_secs)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }

    pub fn task_retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.task_retention_secs)
    }

    pub fn sync_wait(&self) -> Duration {
        Duration::from_millis(self.sync_wait_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                max_request_bytes: MAX_REQUEST_BYTES,
            },
            storage: StorageConfig {
                workspace_root: PathBuf::from("./workspace"),
                scratch_dir: env::temp_dir().join("xfer-scratch"),
            },
            transfer: TransferConfig {
                session_idle_secs: SESSION_IDLE_SECS,
                remote_timeout_secs: REMOTE_TIMEOUT_SECS,
                task_retention_secs: TASK_RETENTION_SECS,
                sync_wait_ms: SYNC_WAIT_MS,
                max_artifact_bytes: MAX_ARTIFACT_SIZE,
                cleanup_interval_secs: 300,
            },
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
#[error("Invalid value for {name}: {value:?}")]
pub struct ConfigError {
    pub name: &'static str,
    pub value: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: parse_var("SERVER_PORT", defaults.server.port)?,
                max_request_bytes: parse_var("XFER_MAX_REQUEST_BYTES", defaults.server.max_request_bytes)?,
            },
            storage: StorageConfig {
                workspace_root: env::var("XFER_WORKSPACE_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.workspace_root),
                scratch_dir: env::var("XFER_SCRATCH_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.scratch_dir),
            },
            transfer: TransferConfig {
                session_idle_secs: parse_var("XFER_SESSION_IDLE_SECS", defaults.transfer.session_idle_secs)?,
                remote_timeout_secs: parse_var("XFER_REMOTE_TIMEOUT_SECS", defaults.transfer.remote_timeout_secs)?,
                task_retention_secs: parse_var("XFER_TASK_RETENTION_SECS", defaults.transfer.task_retention_secs)?,
                sync_wait_ms: parse_var("XFER_SYNC_WAIT_MS", defaults.transfer.sync_wait_ms)?,
                max_artifact_bytes: parse_var("XFER_MAX_ARTIFACT_BYTES", defaults.transfer.max_artifact_bytes)?,
                cleanup_interval_secs: parse_var("XFER_CLEANUP_INTERVAL_SECS", defaults.transfer.cleanup_interval_secs)?,
            },
        })
    }
}

/// Read `name` from the environment, falling back to `default` when unset
fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError { name, value }),
        Err(_) => Ok(default),
    }
}
