//! Upload types for resumable chunked transfers

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Constants
// ============================================================================

/// Maximum declared artifact size: 2GB
pub const MAX_ARTIFACT_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// Idle time after which an incomplete session is abandoned: 1 hour
pub const SESSION_IDLE_SECS: i64 = 60 * 60;

// ============================================================================
// Session Types
// ============================================================================

/// What the assembled bytes are
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    /// A zip to be extracted under the destination directory
    Archive,
    /// A file stored verbatim
    Raw,
}

/// Where a completed upload ends up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    /// Absolute path of the target directory
    #[serde(skip)]
    pub directory: PathBuf,

    /// Workspace-relative directory, `/`-separated
    pub relative: String,

    /// File name for raw storage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,

    /// Whether existing files may be replaced
    pub overwrite: bool,
}

impl Destination {
    /// Key under which at most one open session may exist
    pub fn key(&self) -> String {
        match &self.file_name {
            Some(name) if self.relative.is_empty() => name.clone(),
            Some(name) => format!("{}/{}", self.relative, name),
            None => format!("{}/", self.relative),
        }
    }
}

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Accepting chunks
    Receiving,
    /// All bytes received, artifact handed off
    Complete,
    /// Released before completion
    Abandoned,
}

/// One in-flight chunked upload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSession {
    /// Unique session ID, also the last segment of its resume location
    pub id: Uuid,

    pub destination: Destination,

    /// Total artifact length in bytes
    pub declared_length: u64,

    /// Contiguous prefix received so far
    pub received: u64,

    pub kind: ContentKind,

    /// Scratch file holding the received prefix
    #[serde(skip)]
    pub scratch_path: PathBuf,

    pub status: SessionStatus,

    pub created_at: DateTime<Utc>,

    pub last_activity: DateTime<Utc>,
}

impl TransferSession {
    /// Create a new session
    pub fn new(
        destination: Destination,
        declared_length: u64,
        kind: ContentKind,
        scratch_path: PathBuf,
        id: Uuid,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            destination,
            declared_length,
            received: 0,
            kind,
            scratch_path,
            status: SessionStatus::Receiving,
            created_at: now,
            last_activity: now,
        }
    }

    /// Whether the session still accepts chunks
    pub fn is_open(&self) -> bool {
        self.status == SessionStatus::Receiving
    }

    /// Whether a new request for the same destination may resume this session
    pub fn is_compatible(&self, declared_length: u64, kind: ContentKind) -> bool {
        self.declared_length == declared_length && self.kind == kind
    }

    /// Check if the session has been idle longer than `idle`
    pub fn is_idle(&self, idle: chrono::Duration) -> bool {
        Utc::now() - self.last_activity > idle
    }

    /// Calculate progress percentage
    pub fn progress(&self) -> f64 {
        if self.declared_length == 0 {
            return 100.0;
        }
        (self.received as f64 / self.declared_length as f64) * 100.0
    }
}

/// A fully received artifact, still in scratch storage
#[derive(Debug, Clone)]
pub struct AssembledArtifact {
    pub session_id: Uuid,
    pub path: PathBuf,
    pub length: u64,
    pub kind: ContentKind,
    pub destination: Destination,
}

/// Result of appending one chunk
#[derive(Debug, Clone)]
pub enum AppendOutcome {
    /// More bytes are expected; the value is the received prefix length
    Incomplete(u64),
    /// The last byte arrived
    Complete(AssembledArtifact),
}

// ============================================================================
// Error Types
// ============================================================================

/// Upload error types
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Destination {destination} already has an upload in progress ({existing})")]
    DestinationConflict { destination: String, existing: Uuid },

    #[error("Range mismatch: expected a chunk starting at byte {expected}, got {actual}")]
    RangeMismatch { expected: u64, actual: u64 },

    #[error("Length mismatch: session declares {declared} bytes, chunk claims {claimed}")]
    LengthMismatch { declared: u64, claimed: u64 },

    #[error("Malformed range: {0}")]
    MalformedRange(String),

    #[error("Artifact too large: {size} bytes (max: {max})")]
    TooLarge { size: u64, max: u64 },

    #[error("Storage error: {0}")]
    StorageError(String),
}
