//! Import path
//!
//! Dispatch → (chunk phase) → completion. The mode and the source are
//! decided once when the request arrives; completion either moves the
//! assembled artifact into place or extracts it.

use std::path::Path;

use axum::body::Bytes;
use reqwest::Url;
use uuid::Uuid;

use super::controller::TransferController;
use super::remote::file_name_from_url;
use super::types::{
    ChunkAccepted, Dispatched, ImportMode, ImportOutcome, ImportRequest, ImportResult,
    ImportSource, Imported, ModeChoice, TransferError,
};
use crate::archive::{sanitize_file_name, unpack_archive, UnpackOptions};
use crate::tasks::TaskId;
use crate::upload::{
    digest_file, parse_session_id, AppendOutcome, AssembledArtifact, ByteRange, ContentKind,
    Destination, TransferSession,
};
use crate::workspace::Workspace;

impl TransferController {
    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Entry point for `POST /xfer/import/<dir>`
    pub async fn import(&self, request: ImportRequest, body: Bytes) -> Result<Imported, TransferError> {
        let destination = self.destination(&request).await?;

        match request.source {
            ImportSource::Chunked { declared_length } => {
                let kind = content_kind(&destination);
                let session = self
                    .inner
                    .assembler
                    .begin(destination, declared_length, kind)
                    .await?;
                Ok(Imported::Started(session))
            }
            ImportSource::Body => Ok(Imported::Dispatched(self.import_body(destination, body).await?)),
            ImportSource::Remote { url } => {
                Ok(Imported::Dispatched(self.import_remote(destination, url).await?))
            }
        }
    }

    /// Resolve the target directory and decide the import mode
    async fn destination(&self, request: &ImportRequest) -> Result<Destination, TransferError> {
        let dir = self.inner.workspace.directory(&request.target).await?;
        let mode = self.mode(request)?;

        tracing::debug!(
            target = %dir.relative,
            mode = ?mode,
            source = ?request.source,
            "Import dispatched"
        );

        Ok(Destination {
            directory: dir.absolute,
            relative: dir.relative,
            file_name: match mode {
                ImportMode::Raw { file_name } => Some(file_name),
                ImportMode::Extract => None,
            },
            overwrite: !request.flags.no_overwrite,
        })
    }

    fn mode(&self, request: &ImportRequest) -> Result<ImportMode, TransferError> {
        let choice = ImportMode::select(
            &request.flags,
            request.slug.as_deref(),
            request.content_type.as_deref(),
        );

        match choice {
            ModeChoice::Extract => Ok(ImportMode::Extract),
            ModeChoice::Raw => {
                let file_name = match (&request.slug, &request.source) {
                    (Some(slug), _) => sanitize_file_name(slug)?,
                    (None, ImportSource::Remote { url }) => file_name_from_url(url),
                    (None, _) => {
                        return Err(TransferError::BadRequest(
                            "Raw import requires a Slug file name".to_string(),
                        ))
                    }
                };
                Ok(ImportMode::Raw { file_name })
            }
        }
    }

    // ========================================================================
    // Sources
    // ========================================================================

    /// The request body is the whole artifact: one chunk of a fresh session
    async fn import_body(&self, destination: Destination, body: Bytes) -> Result<Dispatched, TransferError> {
        let kind = content_kind(&destination);
        let declared_length = body.len() as u64;
        let session = self
            .inner
            .assembler
            .begin_exclusive(destination, declared_length, kind)
            .await?;

        let range = ByteRange::full(declared_length);
        match self.inner.assembler.append_chunk(session.id, range, &body).await {
            Ok(AppendOutcome::Complete(artifact)) => self.dispatch_completion(artifact).await,
            Ok(AppendOutcome::Incomplete(received)) => {
                let _ = self.inner.assembler.abandon(session.id).await;
                Err(TransferError::Internal(format!(
                    "Single-request upload stopped at byte {} of {}",
                    received, declared_length
                )))
            }
            Err(e) => {
                let _ = self.inner.assembler.abandon(session.id).await;
                Err(e.into())
            }
        }
    }

    /// Fetch a remote artifact as tracked work
    async fn import_remote(&self, destination: Destination, url: Url) -> Result<Dispatched, TransferError> {
        let controller = self.clone();
        let description = format!("Import {} into /{}", url, destination.key());

        self.run_tracked(description, move |task_id| async move {
            controller.fetch_and_finish(task_id, url, destination).await
        })
        .await
    }

    async fn fetch_and_finish(
        &self,
        task_id: TaskId,
        url: Url,
        destination: Destination,
    ) -> Result<ImportOutcome, TransferError> {
        let scratch = self.inner.assembler.scratch().clone();
        let scratch_id = Uuid::new_v4();
        let path = scratch.create(scratch_id).await?;

        let result = async {
            self.report_progress(&task_id, format!("Fetching {}", url));
            let fetched = self
                .inner
                .fetcher
                .fetch_to(&url, &path, self.inner.assembler.max_artifact_size())
                .await?;

            let artifact = AssembledArtifact {
                session_id: scratch_id,
                path: path.clone(),
                length: fetched.bytes,
                kind: content_kind(&destination),
                destination,
            };
            self.finish(&task_id, &artifact).await
        }
        .await;

        if let Err(e) = scratch.release(scratch_id).await {
            tracing::warn!(scratch_id = %scratch_id, error = %e, "Failed to release scratch file");
        }

        result
    }

    // ========================================================================
    // Chunk Phase
    // ========================================================================

    /// Entry point for `PUT /xfer/import/<session>`
    pub async fn append_chunk(
        &self,
        session_id: &str,
        range: ByteRange,
        data: Bytes,
    ) -> Result<ChunkAccepted, TransferError> {
        let id = parse_session_id(session_id)?;

        match self.inner.assembler.append_chunk(id, range, &data).await? {
            AppendOutcome::Incomplete(received) => {
                let declared_length = range.total;
                Ok(ChunkAccepted::Continue {
                    session_id: id,
                    received,
                    declared_length,
                })
            }
            AppendOutcome::Complete(artifact) => {
                Ok(ChunkAccepted::Finished(self.dispatch_completion(artifact).await?))
            }
        }
    }

    /// Entry point for `GET /xfer/import/<session>`
    pub async fn session_status(&self, session_id: &str) -> Result<TransferSession, TransferError> {
        Ok(self.inner.assembler.get_session_by_str(session_id).await?)
    }

    /// Entry point for `DELETE /xfer/import/<session>`. Idempotent.
    pub async fn abandon(&self, session_id: &str) -> Result<(), TransferError> {
        let Ok(id) = parse_session_id(session_id) else {
            return Ok(());
        };
        self.inner.assembler.abandon(id).await?;
        Ok(())
    }

    // ========================================================================
    // Completion
    // ========================================================================

    async fn dispatch_completion(&self, artifact: AssembledArtifact) -> Result<Dispatched, TransferError> {
        let controller = self.clone();
        let description = format!("Import into /{}", artifact.destination.key());

        self.run_tracked(description, move |task_id| async move {
            let result = controller.finish(&task_id, &artifact).await;

            let scratch = controller.inner.assembler.scratch();
            if let Err(e) = scratch.release(artifact.session_id).await {
                tracing::warn!(session_id = %artifact.session_id, error = %e, "Failed to release scratch file");
            }

            result
        })
        .await
    }

    /// Move or extract a complete artifact into the workspace.
    ///
    /// Cancellation is checked immediately before the workspace is touched.
    async fn finish(&self, task_id: &TaskId, artifact: &AssembledArtifact) -> Result<ImportOutcome, TransferError> {
        let sha256 = digest_file(&artifact.path).await?;
        let destination = &artifact.destination;

        let outcome = match (&destination.file_name, artifact.kind) {
            (Some(file_name), ContentKind::Raw) => {
                self.report_progress(task_id, format!("Storing {}", file_name));
                let relative = join_relative(&destination.relative, file_name);
                self.ensure_active(task_id)?;
                store_raw(&artifact.path, &destination.directory.join(file_name), &relative, destination.overwrite)
                    .await?;

                ImportOutcome {
                    result: ImportResult::Stored,
                    location: Workspace::location_of(&relative),
                    path: relative,
                    bytes: artifact.length,
                    sha256,
                    entries: None,
                }
            }
            _ => {
                self.report_progress(task_id, "Extracting archive");
                let options = UnpackOptions {
                    overwrite: destination.overwrite,
                    backup_dir: self.inner.assembler.scratch().backup_dir(artifact.session_id),
                };
                let archive = artifact.path.clone();
                let dest = destination.directory.clone();
                self.ensure_active(task_id)?;
                let report = tokio::task::spawn_blocking(move || unpack_archive(&archive, &dest, &options))
                    .await
                    .map_err(|e| TransferError::Internal(e.to_string()))??;

                let relative = format!("{}/", destination.relative.trim_end_matches('/'));
                let relative = relative.trim_start_matches('/').to_string();
                ImportOutcome {
                    result: ImportResult::Extracted,
                    location: Workspace::location_of(&relative),
                    path: relative,
                    bytes: artifact.length,
                    sha256,
                    entries: Some(report.entries()),
                }
            }
        };

        tracing::info!(
            task_id = %task_id,
            result = ?outcome.result,
            path = %outcome.path,
            bytes = outcome.bytes,
            sha256 = %outcome.sha256,
            "Import complete"
        );

        Ok(outcome)
    }
}

fn content_kind(destination: &Destination) -> ContentKind {
    if destination.file_name.is_some() {
        ContentKind::Raw
    } else {
        ContentKind::Archive
    }
}

fn join_relative(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Move `scratch` to `target`, copying when a rename is not possible
async fn store_raw(scratch: &Path, target: &Path, relative: &str, overwrite: bool) -> Result<(), TransferError> {
    match tokio::fs::symlink_metadata(target).await {
        Ok(meta) if meta.is_dir() || !overwrite => {
            return Err(TransferError::DestinationConflict(relative.to_string()));
        }
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    if tokio::fs::rename(scratch, target).await.is_err() {
        tracing::debug!(target = %target.display(), "Rename failed, copying scratch file");
        tokio::fs::copy(scratch, target).await?;
    }

    Ok(())
}
