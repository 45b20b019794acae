//! Transfer types: dispatch variants, outcomes, and the error taxonomy

use std::path::PathBuf;

use axum::http::StatusCode;
use reqwest::Url;
use serde::Serialize;
use uuid::Uuid;

use crate::archive::{ArchiveError, UnsafePath};
use crate::tasks::{Task, TaskError, TaskFailure};
use crate::upload::{TransferSession, UploadError};

// ============================================================================
// Dispatch
// ============================================================================

/// What happens to an artifact once all of its bytes have arrived
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportMode {
    /// Store verbatim as `file_name` inside the target directory
    Raw { file_name: String },
    /// Unpack the archive under the target directory
    Extract,
}

impl ImportMode {
    /// Pick the mode from the request's options, filename hint and content type
    pub fn select(flags: &XferFlags, slug: Option<&str>, content_type: Option<&str>) -> ModeChoice {
        if flags.raw {
            return ModeChoice::Raw;
        }
        if flags.unzip {
            return ModeChoice::Extract;
        }
        match (slug, content_type) {
            (Some(_), Some(ct)) if !crate::archive::is_archive_content_type(ct) => ModeChoice::Raw,
            _ => ModeChoice::Extract,
        }
    }
}

/// Mode decision before a file name is known
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeChoice {
    Raw,
    Extract,
}

/// Where the artifact's bytes come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportSource {
    /// The request body is the whole artifact
    Body,
    /// The client will send the artifact in ranges against a session
    Chunked { declared_length: u64 },
    /// The server fetches the artifact itself
    Remote { url: Url },
}

/// Options carried by the `X-Xfer-Options` header
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct XferFlags {
    /// Store the artifact verbatim
    pub raw: bool,
    /// Force extraction
    pub unzip: bool,
    /// Fail instead of replacing existing files
    pub no_overwrite: bool,
}

impl XferFlags {
    /// Parse a comma-separated option list
    pub fn parse(header: &str) -> Result<Self, TransferError> {
        let mut flags = Self::default();
        for option in header.split(',').map(str::trim).filter(|o| !o.is_empty()) {
            match option.to_ascii_lowercase().as_str() {
                "raw" => flags.raw = true,
                "unzip" => flags.unzip = true,
                "no-overwrite" => flags.no_overwrite = true,
                other => {
                    return Err(TransferError::BadRequest(format!(
                        "Unknown transfer option: {}",
                        other
                    )))
                }
            }
        }

        if flags.raw && flags.unzip {
            return Err(TransferError::BadRequest(
                "Options raw and unzip are mutually exclusive".to_string(),
            ));
        }

        Ok(flags)
    }
}

/// Parse a remote source reference; only absolute http(s) URLs are accepted
pub fn parse_source(source: &str) -> Result<Url, TransferError> {
    let invalid = |reason: &str| TransferError::InvalidSource(format!("{}: {}", source, reason));

    let url = Url::parse(source.trim()).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("unsupported scheme"));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host"));
    }

    Ok(url)
}

// ============================================================================
// Outcomes
// ============================================================================

/// Which kind of success an import produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportResult {
    /// A single file was written
    Stored,
    /// A tree was extracted
    Extracted,
}

/// A finished import
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub result: ImportResult,
    /// URL of the created file or directory
    pub location: String,
    /// Workspace-relative path of the created file or directory
    pub path: String,
    /// Artifact size as received
    pub bytes: u64,
    /// SHA-256 of the received artifact
    pub sha256: String,
    /// Entries written, for extractions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<usize>,
}

/// How tracked work answered the request that started it
#[derive(Debug, Clone)]
pub enum Dispatched {
    /// Finished within the synchronous wait
    Done(ImportOutcome),
    /// Still running; poll the task
    Tracked(Task),
}

/// Result of one chunk request
#[derive(Debug, Clone)]
pub enum ChunkAccepted {
    /// More bytes are expected
    Continue {
        session_id: Uuid,
        received: u64,
        declared_length: u64,
    },
    /// The artifact is complete and has been dispatched
    Finished(Dispatched),
}

/// Result of an import dispatch
#[derive(Debug, Clone)]
pub enum Imported {
    /// A chunked upload was opened; the client sends ranges next
    Started(TransferSession),
    /// The artifact was complete on arrival and has been dispatched
    Dispatched(Dispatched),
}

/// An import request as decoded from HTTP
#[derive(Debug, Clone)]
pub struct ImportRequest {
    /// Workspace-relative target directory
    pub target: String,
    pub source: ImportSource,
    pub flags: XferFlags,
    /// Percent-decoded `Slug` header
    pub slug: Option<String>,
    pub content_type: Option<String>,
}

/// A streamed export
pub struct ArchiveStream {
    /// Download name, `<dirname>.zip`
    pub file_name: String,
    pub body: axum::body::Body,
}

/// A directory inside the workspace
#[derive(Debug, Clone)]
pub struct ResolvedDir {
    pub absolute: PathBuf,
    /// `/`-separated, empty for the workspace root
    pub relative: String,
}

// ============================================================================
// Error Types
// ============================================================================

/// Transfer error types
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("Destination {0} is already in use")]
    DestinationConflict(String),

    #[error("Range mismatch: expected a chunk starting at byte {expected}, got {actual}")]
    RangeMismatch { expected: u64, actual: u64 },

    #[error("Length mismatch: session declares {declared} bytes, request claims {claimed}")]
    LengthMismatch { declared: u64, claimed: u64 },

    #[error("Malformed range: {0}")]
    MalformedRange(String),

    #[error("Artifact too large: {size} bytes (max: {max})")]
    TooLarge { size: u64, max: u64 },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid source: {0}")]
    InvalidSource(String),

    #[error("Invalid archive: {0}")]
    InvalidArchive(String),

    #[error("Unsafe archive entry {0}")]
    UnsafeArchiveEntry(UnsafePath),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error("Timed out after {secs}s fetching {url}")]
    RemoteTimeout { url: String, secs: u64 },

    #[error("Remote fetch failed: {0}")]
    RemoteFetch(String),

    #[error("Task {0} was cancelled")]
    Cancelled(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TransferError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            TransferError::DestinationConflict(_) => StatusCode::CONFLICT,
            TransferError::RangeMismatch { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            TransferError::LengthMismatch { .. } => StatusCode::BAD_REQUEST,
            TransferError::MalformedRange(_) => StatusCode::BAD_REQUEST,
            TransferError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            TransferError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            TransferError::InvalidSource(_) => StatusCode::BAD_REQUEST,
            TransferError::InvalidArchive(_) => StatusCode::BAD_REQUEST,
            TransferError::UnsafeArchiveEntry(_) => StatusCode::BAD_REQUEST,
            TransferError::Task(_) => StatusCode::NOT_FOUND,
            TransferError::RemoteTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            TransferError::RemoteFetch(_) => StatusCode::BAD_GATEWAY,
            TransferError::Cancelled(_) => StatusCode::CONFLICT,
            TransferError::NotFound(_) => StatusCode::NOT_FOUND,
            TransferError::BadRequest(_) => StatusCode::BAD_REQUEST,
            TransferError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TransferError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::DestinationConflict(_) => "DESTINATION_CONFLICT",
            TransferError::RangeMismatch { .. } => "RANGE_MISMATCH",
            TransferError::LengthMismatch { .. } => "LENGTH_MISMATCH",
            TransferError::MalformedRange(_) => "MALFORMED_RANGE",
            TransferError::TooLarge { .. } => "TOO_LARGE",
            TransferError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            TransferError::InvalidSource(_) => "INVALID_SOURCE",
            TransferError::InvalidArchive(_) => "INVALID_ARCHIVE",
            TransferError::UnsafeArchiveEntry(_) => "UNSAFE_ARCHIVE_ENTRY",
            TransferError::Task(_) => "TASK_DOES_NOT_EXIST",
            TransferError::RemoteTimeout { .. } => "REMOTE_TIMEOUT",
            TransferError::RemoteFetch(_) => "REMOTE_FETCH_FAILED",
            TransferError::Cancelled(_) => "CANCELLED",
            TransferError::NotFound(_) => "NOT_FOUND",
            TransferError::BadRequest(_) => "BAD_REQUEST",
            TransferError::Io(_) => "IO_ERROR",
            TransferError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the error is an internal failure rather than a protocol error
    pub fn is_internal(&self) -> bool {
        self.status_code().is_server_error()
            && !matches!(
                self,
                TransferError::RemoteTimeout { .. } | TransferError::RemoteFetch(_)
            )
    }

    /// Received prefix a client should resume from, for range errors
    pub fn resume_offset(&self) -> Option<u64> {
        match self {
            TransferError::RangeMismatch { expected, .. } => Some(*expected),
            _ => None,
        }
    }

    /// Failure detail recorded on a tracked task
    pub fn to_failure(&self) -> TaskFailure {
        TaskFailure {
            code: self.code().to_string(),
            message: self.to_string(),
            status: self.status_code().as_u16(),
        }
    }
}

impl From<UploadError> for TransferError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::SessionNotFound(id) => TransferError::SessionNotFound(id),
            UploadError::DestinationConflict { destination, .. } => {
                TransferError::DestinationConflict(destination)
            }
            UploadError::RangeMismatch { expected, actual } => {
                TransferError::RangeMismatch { expected, actual }
            }
            UploadError::LengthMismatch { declared, claimed } => {
                TransferError::LengthMismatch { declared, claimed }
            }
            UploadError::MalformedRange(range) => TransferError::MalformedRange(range),
            UploadError::TooLarge { size, max } => TransferError::TooLarge { size, max },
            UploadError::StorageError(message) => TransferError::Internal(message),
        }
    }
}

impl From<ArchiveError> for TransferError {
    fn from(err: ArchiveError) -> Self {
        match err {
            ArchiveError::Invalid(message) => TransferError::InvalidArchive(message),
            ArchiveError::UnsafeEntry(path) => TransferError::UnsafeArchiveEntry(path),
            ArchiveError::AlreadyExists(name) => TransferError::DestinationConflict(name),
            ArchiveError::Io(e) => TransferError::Io(e),
        }
    }
}

impl From<UnsafePath> for TransferError {
    fn from(err: UnsafePath) -> Self {
        TransferError::BadRequest(format!("Unsafe path {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        let flags = XferFlags::parse("raw, no-overwrite").unwrap();
        assert!(flags.raw);
        assert!(flags.no_overwrite);
        assert!(!flags.unzip);

        assert_eq!(XferFlags::parse("").unwrap(), XferFlags::default());
        assert!(matches!(
            XferFlags::parse("raw,unzip"),
            Err(TransferError::BadRequest(_))
        ));
        assert!(matches!(
            XferFlags::parse("explode"),
            Err(TransferError::BadRequest(_))
        ));
    }

    #[test]
    fn test_mode_selection() {
        let raw = XferFlags { raw: true, ..Default::default() };
        let unzip = XferFlags { unzip: true, ..Default::default() };
        let none = XferFlags::default();

        assert_eq!(ImportMode::select(&raw, None, Some("application/zip")), ModeChoice::Raw);
        assert_eq!(ImportMode::select(&unzip, Some("a.txt"), Some("text/plain")), ModeChoice::Extract);
        assert_eq!(ImportMode::select(&none, Some("a.txt"), Some("text/plain")), ModeChoice::Raw);
        assert_eq!(ImportMode::select(&none, Some("a.zip"), Some("application/zip")), ModeChoice::Extract);
        assert_eq!(
            ImportMode::select(&none, Some("data.bin"), Some("application/octet-stream")),
            ModeChoice::Raw
        );
        assert_eq!(ImportMode::select(&none, None, Some("text/plain")), ModeChoice::Extract);
        assert_eq!(ImportMode::select(&none, None, None), ModeChoice::Extract);
    }

    #[test]
    fn test_parse_source() {
        let url = parse_source("http://example.com/tools/restorer_3.0.0.zip").unwrap();
        assert_eq!(url.host_str(), Some("example.com"));

        for source in ["pumpkins", "/relative/path.zip", "ftp://example.com/a.zip", "file:///etc/passwd", ""] {
            assert!(
                matches!(parse_source(source), Err(TransferError::InvalidSource(_))),
                "{source:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            TransferError::from(UploadError::DestinationConflict {
                destination: "a/b".into(),
                existing: uuid::Uuid::new_v4(),
            })
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            TransferError::from(TaskError::TaskDoesNotExist("x".into())).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            TransferError::from(ArchiveError::Invalid("junk".into())).code(),
            "INVALID_ARCHIVE"
        );

        let mismatch = TransferError::RangeMismatch { expected: 100, actual: 50 };
        assert_eq!(mismatch.resume_offset(), Some(100));
        assert_eq!(mismatch.to_failure().status, 416);
    }
}
