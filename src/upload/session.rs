//! Chunk Assembler
//!
//! Manages upload sessions with:
//! - A shared index of open sessions, keyed by ID and by destination
//! - A per-session mutex so chunks for one upload are applied one at a time
//!   while unrelated uploads never contend
//! - Idle-session cleanup that releases scratch storage

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::range::ByteRange;
use super::scratch::ScratchStore;
use super::types::{
    AppendOutcome, AssembledArtifact, ContentKind, Destination, SessionStatus, TransferSession,
    UploadError, MAX_ARTIFACT_SIZE, SESSION_IDLE_SECS,
};

type SessionSlot = Arc<Mutex<TransferSession>>;

// ============================================================================
// Chunk Assembler
// ============================================================================

/// Reconciles incoming byte ranges into complete artifacts
#[derive(Clone)]
pub struct ChunkAssembler {
    inner: Arc<AssemblerInner>,
}

struct AssemblerInner {
    index: RwLock<SessionIndex>,
    scratch: ScratchStore,
    max_artifact_size: u64,
    idle_timeout: chrono::Duration,
}

#[derive(Default)]
struct SessionIndex {
    /// Open sessions indexed by ID
    sessions: HashMap<Uuid, SessionSlot>,
    /// Destination key -> session ID
    by_destination: HashMap<String, Uuid>,
}

impl ChunkAssembler {
    /// Create an assembler with default limits
    pub fn new(scratch: ScratchStore) -> Self {
        Self::with_limits(
            scratch,
            MAX_ARTIFACT_SIZE,
            chrono::Duration::seconds(SESSION_IDLE_SECS),
        )
    }

    /// Create an assembler with a custom size bound and idle timeout
    pub fn with_limits(
        scratch: ScratchStore,
        max_artifact_size: u64,
        idle_timeout: chrono::Duration,
    ) -> Self {
        Self {
            inner: Arc::new(AssemblerInner {
                index: RwLock::new(SessionIndex::default()),
                scratch,
                max_artifact_size,
                idle_timeout,
            }),
        }
    }

    pub fn scratch(&self) -> &ScratchStore {
        &self.inner.scratch
    }

    /// Largest declared length `begin` accepts
    pub fn max_artifact_size(&self) -> u64 {
        self.inner.max_artifact_size
    }

    // ========================================================================
    // Session Lifecycle
    // ========================================================================

    /// Open a session for `destination`, or resume a compatible one.
    ///
    /// An open session for the same destination with the same declared length
    /// and kind is returned as-is so a reconnecting client can pick up where
    /// it left off; anything else is a conflict.
    pub async fn begin(
        &self,
        destination: Destination,
        declared_length: u64,
        kind: ContentKind,
    ) -> Result<TransferSession, UploadError> {
        self.open(destination, declared_length, kind, true).await
    }

    /// Open a new session for `destination`; any open session is a conflict
    pub async fn begin_exclusive(
        &self,
        destination: Destination,
        declared_length: u64,
        kind: ContentKind,
    ) -> Result<TransferSession, UploadError> {
        self.open(destination, declared_length, kind, false).await
    }

    async fn open(
        &self,
        destination: Destination,
        declared_length: u64,
        kind: ContentKind,
        resume: bool,
    ) -> Result<TransferSession, UploadError> {
        if declared_length > self.inner.max_artifact_size {
            return Err(UploadError::TooLarge {
                size: declared_length,
                max: self.inner.max_artifact_size,
            });
        }

        let key = destination.key();

        let existing = {
            let index = self.inner.index.read().await;
            index
                .by_destination
                .get(&key)
                .and_then(|id| index.sessions.get(id))
                .cloned()
        };

        if let Some(slot) = existing {
            let session = slot.lock().await;
            if session.is_open() {
                if resume && session.is_compatible(declared_length, kind) {
                    tracing::info!(
                        session_id = %session.id,
                        destination = %key,
                        received = session.received,
                        "Resuming upload session"
                    );
                    return Ok(session.clone());
                }
                return Err(UploadError::DestinationConflict {
                    destination: key,
                    existing: session.id,
                });
            }
        }

        let id = Uuid::new_v4();
        let scratch_path = self.inner.scratch.create(id).await?;
        let session = TransferSession::new(destination, declared_length, kind, scratch_path, id);

        {
            let mut index = self.inner.index.write().await;
            if let Some(&other) = index.by_destination.get(&key) {
                if index.sessions.contains_key(&other) {
                    drop(index);
                    self.inner.scratch.release(id).await?;
                    return Err(UploadError::DestinationConflict {
                        destination: key,
                        existing: other,
                    });
                }
            }
            index.by_destination.insert(key.clone(), id);
            index
                .sessions
                .insert(id, Arc::new(Mutex::new(session.clone())));
        }

        tracing::info!(
            session_id = %id,
            destination = %key,
            declared_length = declared_length,
            kind = ?kind,
            "Created upload session"
        );

        Ok(session)
    }

    /// Append one chunk to a session.
    ///
    /// The chunk must start exactly at the received offset. A chunk lying
    /// entirely inside the received prefix is a client retry and is
    /// acknowledged without touching the session.
    pub async fn append_chunk(
        &self,
        session_id: Uuid,
        range: ByteRange,
        data: &[u8],
    ) -> Result<AppendOutcome, UploadError> {
        let slot = self.slot(session_id).await?;
        let mut session = slot.lock().await;

        if !session.is_open() {
            return Err(UploadError::SessionNotFound(session_id.to_string()));
        }

        if session.declared_length == 0 {
            if !data.is_empty() {
                return Err(UploadError::LengthMismatch {
                    declared: 0,
                    claimed: data.len() as u64,
                });
            }
            return Ok(AppendOutcome::Complete(self.complete(&mut session).await));
        }

        if range.total != session.declared_length {
            return Err(UploadError::LengthMismatch {
                declared: session.declared_length,
                claimed: range.total,
            });
        }

        if data.len() as u64 != range.len() {
            return Err(UploadError::MalformedRange(format!(
                "{} announces {} bytes but the body has {}",
                range,
                range.len(),
                data.len()
            )));
        }

        if range.start < session.received && range.end < session.received {
            tracing::debug!(
                session_id = %session_id,
                range = %range,
                received = session.received,
                "Ignoring retried chunk"
            );
            return Ok(AppendOutcome::Incomplete(session.received));
        }

        if range.start != session.received {
            tracing::warn!(
                session_id = %session_id,
                range = %range,
                received = session.received,
                "Rejected non-contiguous chunk"
            );
            return Err(UploadError::RangeMismatch {
                expected: session.received,
                actual: range.start,
            });
        }

        self.inner
            .scratch
            .write_at(&session.scratch_path, range.start, data)
            .await?;
        session.received += data.len() as u64;
        session.last_activity = Utc::now();

        tracing::debug!(
            session_id = %session_id,
            received = session.received,
            declared_length = session.declared_length,
            progress = format!("{:.1}%", session.progress()),
            "Chunk appended"
        );

        if session.received == session.declared_length {
            return Ok(AppendOutcome::Complete(self.complete(&mut session).await));
        }

        Ok(AppendOutcome::Incomplete(session.received))
    }

    /// Mark a session complete and drop it from the index.
    ///
    /// The scratch file is handed to the caller inside the artifact.
    async fn complete(&self, session: &mut TransferSession) -> AssembledArtifact {
        session.status = SessionStatus::Complete;
        session.last_activity = Utc::now();
        self.detach(session.id, &session.destination.key()).await;

        tracing::info!(
            session_id = %session.id,
            destination = %session.destination.key(),
            bytes = session.received,
            "Upload session complete"
        );

        AssembledArtifact {
            session_id: session.id,
            path: session.scratch_path.clone(),
            length: session.received,
            kind: session.kind,
            destination: session.destination.clone(),
        }
    }

    /// Release a session and its scratch storage. Unknown IDs are ignored.
    pub async fn abandon(&self, session_id: Uuid) -> Result<bool, UploadError> {
        let slot = {
            let index = self.inner.index.read().await;
            index.sessions.get(&session_id).cloned()
        };

        let Some(slot) = slot else {
            return Ok(false);
        };

        let mut session = slot.lock().await;
        if !session.is_open() {
            return Ok(false);
        }
        session.status = SessionStatus::Abandoned;
        self.detach(session_id, &session.destination.key()).await;
        self.inner.scratch.release(session_id).await?;

        tracing::info!(
            session_id = %session_id,
            destination = %session.destination.key(),
            received = session.received,
            "Upload session abandoned"
        );

        Ok(true)
    }

    async fn detach(&self, session_id: Uuid, key: &str) {
        let mut index = self.inner.index.write().await;
        index.sessions.remove(&session_id);
        if index.by_destination.get(key) == Some(&session_id) {
            index.by_destination.remove(key);
        }
    }

    // ========================================================================
    // Query Methods
    // ========================================================================

    async fn slot(&self, session_id: Uuid) -> Result<SessionSlot, UploadError> {
        let index = self.inner.index.read().await;
        index
            .sessions
            .get(&session_id)
            .cloned()
            .ok_or_else(|| UploadError::SessionNotFound(session_id.to_string()))
    }

    /// Snapshot of an open session
    pub async fn get_session(&self, session_id: Uuid) -> Result<TransferSession, UploadError> {
        let slot = self.slot(session_id).await?;
        let session = slot.lock().await;
        Ok(session.clone())
    }

    /// Get a session by string ID
    pub async fn get_session_by_str(&self, id: &str) -> Result<TransferSession, UploadError> {
        let uuid = parse_session_id(id)?;
        self.get_session(uuid).await
    }

    /// Number of open sessions
    pub async fn session_count(&self) -> usize {
        let index = self.inner.index.read().await;
        index.sessions.len()
    }

    // ========================================================================
    // Cleanup
    // ========================================================================

    /// Abandon sessions idle longer than the configured timeout.
    ///
    /// Sessions busy with a chunk are skipped. Returns the number abandoned.
    pub async fn cleanup_idle(&self) -> usize {
        let slots: Vec<(Uuid, SessionSlot)> = {
            let index = self.inner.index.read().await;
            index
                .sessions
                .iter()
                .map(|(id, slot)| (*id, slot.clone()))
                .collect()
        };

        let mut idle_ids = Vec::new();
        for (id, slot) in slots {
            if let Ok(session) = slot.try_lock() {
                if session.is_idle(self.inner.idle_timeout) {
                    idle_ids.push(id);
                }
            }
        }

        let mut count = 0;
        for id in idle_ids {
            match self.abandon(id).await {
                Ok(true) => count += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(session_id = %id, error = %e, "Failed to release idle session"),
            }
        }

        if count > 0 {
            tracing::info!(count = count, "Cleaned up idle upload sessions");
        }

        count
    }

    /// Start background cleanup task
    pub fn start_cleanup_task(self, period: std::time::Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);

            loop {
                interval.tick().await;
                self.cleanup_idle().await;
            }
        })
    }
}

/// Parse a session ID taken from a request path
pub fn parse_session_id(id: &str) -> Result<Uuid, UploadError> {
    Uuid::parse_str(id).map_err(|_| UploadError::SessionNotFound(id.to_string()))
}

// ============================================================================
// Tests
// ============================================================================
