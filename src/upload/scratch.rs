//! Scratch Store
//!
//! Local filesystem storage for partially received artifacts. Each session
//! owns exactly one file, `sessions/<session-id>.part`, so unrelated uploads
//! can never collide. The directory is wiped on startup, so sessions do not
//! survive a restart.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use uuid::Uuid;

use super::types::UploadError;

/// Read buffer for digests: 64KB
const DIGEST_BUFFER_SIZE: usize = 64 * 1024;

/// Local scratch storage for upload sessions
#[derive(Debug, Clone)]
pub struct ScratchStore {
    base_path: PathBuf,
}

impl ScratchStore {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    /// Create the layout, discarding leftovers from a previous process
    pub async fn init(&self) -> Result<(), UploadError> {
        for dir in [self.sessions_dir(), self.backups_dir()] {
            if dir.exists() {
                tokio::fs::remove_dir_all(&dir)
                    .await
                    .map_err(|e| UploadError::StorageError(e.to_string()))?;
            }
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| UploadError::StorageError(e.to_string()))?;
        }
        Ok(())
    }

    fn sessions_dir(&self) -> PathBuf {
        self.base_path.join("sessions")
    }

    fn backups_dir(&self) -> PathBuf {
        self.base_path.join("backups")
    }

    /// Scratch file for a session
    pub fn session_path(&self, session_id: Uuid) -> PathBuf {
        self.sessions_dir().join(format!("{}.part", session_id))
    }

    /// Spool file for an export archive being packed
    pub fn spool_path(&self, export_id: Uuid) -> PathBuf {
        self.sessions_dir().join(format!("{}.zip", export_id))
    }

    /// Directory for copies of files an extraction overwrites
    pub fn backup_dir(&self, session_id: Uuid) -> PathBuf {
        self.backups_dir().join(session_id.to_string())
    }

    /// Create an empty scratch file for a session
    pub async fn create(&self, session_id: Uuid) -> Result<PathBuf, UploadError> {
        let path = self.session_path(session_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| UploadError::StorageError(e.to_string()))?;
        }

        tokio::fs::File::create(&path)
            .await
            .map_err(|e| UploadError::StorageError(e.to_string()))?;

        Ok(path)
    }

    /// Write `data` at `offset`, discarding anything stored past it.
    ///
    /// After a successful call the file holds exactly `offset + data.len()`
    /// bytes.
    pub async fn write_at(&self, path: &Path, offset: u64, data: &[u8]) -> Result<(), UploadError> {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(path)
            .await
            .map_err(|e| UploadError::StorageError(format!("Failed to open scratch file: {}", e)))?;

        file.set_len(offset)
            .await
            .map_err(|e| UploadError::StorageError(e.to_string()))?;
        file.seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(|e| UploadError::StorageError(e.to_string()))?;
        file.write_all(data)
            .await
            .map_err(|e| UploadError::StorageError(format!("Failed to write chunk: {}", e)))?;
        file.flush()
            .await
            .map_err(|e| UploadError::StorageError(e.to_string()))?;

        Ok(())
    }

    /// Remove a session's scratch file and backups. Idempotent.
    pub async fn release(&self, session_id: Uuid) -> Result<(), UploadError> {
        remove_if_exists(&self.session_path(session_id)).await?;

        let backups = self.backup_dir(session_id);
        if backups.exists() {
            tokio::fs::remove_dir_all(&backups)
                .await
                .map_err(|e| UploadError::StorageError(e.to_string()))?;
        }

        Ok(())
    }
}

async fn remove_if_exists(path: &Path) -> Result<(), UploadError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(UploadError::StorageError(e.to_string())),
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Compute SHA-256 hash of data
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute SHA-256 hash of a file without loading it into memory
pub async fn digest_file(path: &Path) -> Result<String, UploadError> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| UploadError::StorageError(e.to_string()))?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; DIGEST_BUFFER_SIZE];
    loop {
        let read = file
            .read(&mut buffer)
            .await
            .map_err(|e| UploadError::StorageError(e.to_string()))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_compute_hash() {
        let data = b"Hello, World!";
        let hash = compute_hash(data);
        assert_eq!(hash.len(), 64); // SHA-256 = 32 bytes = 64 hex chars
    }

    #[tokio::test]
    async fn test_write_and_release() {
        let temp_dir = TempDir::new().unwrap();
        let store = ScratchStore::new(temp_dir.path().to_path_buf());
        store.init().await.unwrap();

        let session_id = Uuid::new_v4();
        let path = store.create(session_id).await.unwrap();

        store.write_at(&path, 0, b"Hello, ").await.unwrap();
        store.write_at(&path, 7, b"World!").await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"Hello, World!");
        assert_eq!(digest_file(&path).await.unwrap(), compute_hash(b"Hello, World!"));

        store.release(session_id).await.unwrap();
        assert!(!path.exists());

        // Idempotent
        store.release(session_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_write_at_truncates_tail() {
        let temp_dir = TempDir::new().unwrap();
        let store = ScratchStore::new(temp_dir.path().to_path_buf());

        let session_id = Uuid::new_v4();
        let path = store.create(session_id).await.unwrap();

        store.write_at(&path, 0, b"abcdefgh").await.unwrap();
        store.write_at(&path, 3, b"XY").await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"abcXY");
    }

    #[tokio::test]
    async fn test_init_discards_leftovers() {
        let temp_dir = TempDir::new().unwrap();
        let store = ScratchStore::new(temp_dir.path().to_path_buf());

        let path = store.create(Uuid::new_v4()).await.unwrap();
        store.init().await.unwrap();

        assert!(!path.exists());
        assert!(temp_dir.path().join("sessions").is_dir());
    }
}
