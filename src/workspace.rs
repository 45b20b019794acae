//! Workspace
//!
//! The local directory tree imports write into and exports read from.
//! Request paths are resolved through the same traversal guard used for
//! archive entries.

use std::path::{Path, PathBuf};

use crate::archive::{sanitize_relative, to_slash_string};
use crate::transfer::{ResolvedDir, TransferError};

/// Prefix of locations reported for created files and directories
pub const FILE_LOCATION_PREFIX: &str = "/file";

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root directory if needed
    pub async fn init(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await
    }

    /// Resolve a request path to `(absolute, normalized relative)`
    pub fn resolve(&self, raw: &str) -> Result<(PathBuf, String), TransferError> {
        let relative = sanitize_relative(raw.trim_matches('/'))?;
        Ok((self.root.join(&relative), to_slash_string(&relative)))
    }

    /// Resolve a request path that must name an existing directory
    pub async fn directory(&self, raw: &str) -> Result<ResolvedDir, TransferError> {
        let (absolute, relative) = self.resolve(raw)?;

        match tokio::fs::metadata(&absolute).await {
            Ok(meta) if meta.is_dir() => Ok(ResolvedDir { absolute, relative }),
            Ok(_) => Err(TransferError::BadRequest(format!(
                "Not a directory: {}",
                relative
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(TransferError::NotFound(format!("Directory {}", relative)))
            }
            Err(e) => Err(TransferError::Io(e)),
        }
    }

    /// URL of a workspace-relative path, each segment percent-encoded
    pub fn location_of(relative: &str) -> String {
        let mut location = String::from(FILE_LOCATION_PREFIX);
        for segment in relative.split('/').filter(|s| !s.is_empty()) {
            location.push('/');
            location.push_str(&urlencoding::encode(segment));
        }
        if relative.is_empty() || relative.ends_with('/') {
            location.push('/');
        }
        location
    }
}
