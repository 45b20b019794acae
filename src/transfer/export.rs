//! Export path
//!
//! The directory is walked up front, so a missing or unreadable tree fails
//! before any response is sent. A blocking thread then packs the entries
//! into a scratch spool file and feeds it to the response body through a
//! bounded channel. Memory use is bounded by the channel depth times the
//! chunk size, whatever the size of the tree.

use std::fs::OpenOptions;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;

use axum::body::{Body, Bytes};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::controller::TransferController;
use super::types::{ArchiveStream, TransferError};
use crate::archive::{collect_entries, pack_entries, ArchiveError, PackEntry, PackReport};

/// Bytes buffered before a chunk is handed to the response: 64KB
const EXPORT_CHUNK_SIZE: usize = 64 * 1024;

/// Chunks in flight between the packer and the response
const EXPORT_CHANNEL_DEPTH: usize = 8;

/// Archive file name suffix
const ARCHIVE_SUFFIX: &str = ".zip";

type ChunkSender = mpsc::Sender<io::Result<Bytes>>;

impl TransferController {
    /// Entry point for `GET /xfer/export/<dir>.zip`
    pub async fn export(&self, raw_path: &str) -> Result<ArchiveStream, TransferError> {
        let dir_path = raw_path
            .trim_end_matches('/')
            .strip_suffix(ARCHIVE_SUFFIX)
            .ok_or_else(|| {
                TransferError::BadRequest(format!("Export path must end in {}", ARCHIVE_SUFFIX))
            })?;

        let dir = self.inner.workspace.directory(dir_path).await?;
        let base_name = dir
            .absolute
            .file_name()
            .filter(|_| !dir.relative.is_empty())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "workspace".to_string());
        let file_name = format!("{}{}", base_name, ARCHIVE_SUFFIX);

        let root = dir.absolute.clone();
        let entries = tokio::task::spawn_blocking(move || collect_entries(&root))
            .await
            .map_err(|e| TransferError::Internal(e.to_string()))??;

        Ok(ArchiveStream {
            file_name,
            body: self.archive_body(dir.relative, entries),
        })
    }

    /// Response body carrying a zip of `entries`.
    ///
    /// A member that cannot be read ends the body with an error, so the
    /// client never receives a well-formed partial archive.
    pub(super) fn archive_body(&self, label: String, entries: Vec<PackEntry>) -> Body {
        let (tx, mut rx) = mpsc::channel::<io::Result<Bytes>>(EXPORT_CHANNEL_DEPTH);
        let spool = self.inner.assembler.scratch().spool_path(Uuid::new_v4());

        tokio::task::spawn_blocking(move || {
            let result = spool_and_send(&spool, &entries, &tx);

            if let Err(e) = std::fs::remove_file(&spool) {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(spool = %spool.display(), error = %e, "Failed to remove export spool");
                }
            }

            match result {
                Ok(report) => tracing::info!(
                    path = %label,
                    files = report.files,
                    directories = report.directories,
                    bytes = report.bytes,
                    "Export complete"
                ),
                Err(e) => {
                    tracing::error!(path = %label, error = %e, "Export aborted");
                    let _ = tx.blocking_send(Err(io::Error::new(io::ErrorKind::Other, e.to_string())));
                }
            }
        });

        Body::from_stream(futures::stream::poll_fn(move |cx| rx.poll_recv(cx)))
    }
}

/// Pack into `spool`, then copy the finished archive into the channel
fn spool_and_send(
    spool: &Path,
    entries: &[PackEntry],
    tx: &ChunkSender,
) -> Result<PackReport, ArchiveError> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(spool)?;

    let report = pack_entries(entries, &mut file)?;

    file.seek(SeekFrom::Start(0))?;
    let mut writer = ChannelWriter::new(tx.clone());
    io::copy(&mut file, &mut writer)?;
    writer.flush()?;

    Ok(report)
}

/// `Write` adapter feeding a response body channel
struct ChannelWriter {
    tx: ChunkSender,
    buffer: Vec<u8>,
}

impl ChannelWriter {
    fn new(tx: ChunkSender) -> Self {
        Self {
            tx,
            buffer: Vec::with_capacity(EXPORT_CHUNK_SIZE),
        }
    }

    fn send_buffer(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let chunk = Bytes::from(std::mem::replace(
            &mut self.buffer,
            Vec::with_capacity(EXPORT_CHUNK_SIZE),
        ));
        self.tx
            .blocking_send(Ok(chunk))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "export client went away"))
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        if self.buffer.len() >= EXPORT_CHUNK_SIZE {
            self.send_buffer()?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffer()
    }
}

impl Drop for ChannelWriter {
    fn drop(&mut self) {
        let _ = self.send_buffer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::controller::test_support;
    use std::io::Read;
    use std::time::Duration;
    use tempfile::TempDir;

    fn spool_files(temp_dir: &TempDir) -> usize {
        std::fs::read_dir(temp_dir.path().join("scratch/sessions"))
            .unwrap()
            .filter(|entry| {
                entry
                    .as_ref()
                    .map_or(false, |e| e.path().extension().map_or(false, |ext| ext == "zip"))
            })
            .count()
    }

    async fn collect(stream: ArchiveStream) -> Vec<u8> {
        axum::body::to_bytes(stream.body, usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn test_export_streams_archive() {
        let temp_dir = TempDir::new().unwrap();
        let controller = test_support::controller(&temp_dir, Duration::from_secs(5)).await;
        let root = controller.workspace().root().to_path_buf();

        tokio::fs::create_dir_all(root.join("sample/dir/empty")).await.unwrap();
        tokio::fs::write(root.join("sample/dir/file.txt"), b"This is the file contents")
            .await
            .unwrap();
        let big: Vec<u8> = (0..300_000u32).map(|i| (i * 7 % 256) as u8).collect();
        tokio::fs::write(root.join("sample/dir/big.bin"), &big).await.unwrap();

        let stream = controller.export("sample/dir.zip").await.unwrap();
        assert_eq!(stream.file_name, "dir.zip");

        let bytes = collect(stream).await;
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();

        let mut contents = String::new();
        archive
            .by_name("file.txt")
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "This is the file contents");

        let mut data = Vec::new();
        archive.by_name("big.bin").unwrap().read_to_end(&mut data).unwrap();
        assert_eq!(data, big);

        assert!(archive.by_name("empty/").unwrap().is_dir());
        assert_eq!(spool_files(&temp_dir), 0);
    }

    #[tokio::test]
    async fn test_unreadable_member_aborts_body() {
        let temp_dir = TempDir::new().unwrap();
        let controller = test_support::controller(&temp_dir, Duration::from_secs(5)).await;
        let root = controller.workspace().root().join("sample");

        tokio::fs::create_dir_all(&root).await.unwrap();
        tokio::fs::write(root.join("a.txt"), vec![1u8; 100_000]).await.unwrap();
        tokio::fs::write(root.join("b.txt"), b"vanishes").await.unwrap();

        let entries = collect_entries(&root).unwrap();
        tokio::fs::remove_file(root.join("b.txt")).await.unwrap();

        let body = controller.archive_body("sample".to_string(), entries);
        assert!(axum::body::to_bytes(body, usize::MAX).await.is_err());
        assert_eq!(spool_files(&temp_dir), 0);
    }

    #[tokio::test]
    async fn test_export_errors() {
        let temp_dir = TempDir::new().unwrap();
        let controller = test_support::controller(&temp_dir, Duration::from_secs(5)).await;
        let root = controller.workspace().root().to_path_buf();
        tokio::fs::write(root.join("plain.txt"), b"x").await.unwrap();
        tokio::fs::create_dir_all(root.join("dir")).await.unwrap();

        assert!(matches!(
            controller.export("missing.zip").await,
            Err(TransferError::NotFound(_))
        ));
        assert!(matches!(
            controller.export("dir").await,
            Err(TransferError::BadRequest(_))
        ));
        assert!(matches!(
            controller.export("plain.txt.zip").await,
            Err(TransferError::BadRequest(_))
        ));
        assert!(matches!(
            controller.export("../outside.zip").await,
            Err(TransferError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_export_workspace_root() {
        let temp_dir = TempDir::new().unwrap();
        let controller = test_support::controller(&temp_dir, Duration::from_secs(5)).await;
        let root = controller.workspace().root().to_path_buf();
        tokio::fs::write(root.join("a.txt"), b"a").await.unwrap();

        let stream = controller.export(".zip").await.unwrap();
        assert_eq!(stream.file_name, "workspace.zip");

        let bytes = collect(stream).await;
        let archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 1);
    }
}
