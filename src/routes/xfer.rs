//! Transfer Routes
//!
//! HTTP endpoints for resumable imports and streamed exports.
//!
//! Endpoints:
//! - POST /xfer/import/<dir> - Start an import (chunked, single-request, or remote)
//! - PUT /xfer/import/<session> - Append a chunk (`Content-Range`)
//! - GET /xfer/import/<session> - Session status, the resume point
//! - DELETE /xfer/import/<session> - Abandon a session
//! - GET /xfer/export/<dir>.zip - Stream a directory as a zip
//!
//! One wildcard route serves both the directory and the session forms of
//! `/xfer/import/...`; the method decides how the tail is read.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::transfer::{
    parse_source, ChunkAccepted, Dispatched, ImportRequest, ImportSource, Imported, TransferError,
    XferFlags,
};
use crate::upload::{resume_range, ByteRange, TransferSession};

// ============================================================================
// Protocol Headers
// ============================================================================

/// Comma-separated import options: `raw`, `unzip`, `no-overwrite`
pub const HEADER_XFER_OPTIONS: &str = "x-xfer-options";

/// Announces a chunked upload of this many bytes
pub const HEADER_XFER_CONTENT_LENGTH: &str = "x-xfer-content-length";

/// File name hint for raw imports
pub const HEADER_SLUG: &str = "slug";

/// Prefix of session locations
const IMPORT_LOCATION_PREFIX: &str = "/xfer/import";

// ============================================================================
// Router
// ============================================================================

/// Create the transfer router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/import", post(start_import_at_root))
        .route(
            "/import/*path",
            post(start_import)
                .put(append_chunk)
                .get(session_status)
                .delete(abandon_session),
        )
        .route("/export/*path", get(export))
}

// ============================================================================
// Import Handlers
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ImportQuery {
    /// Remote source URL
    source: Option<String>,
}

/// POST /xfer/import/<dir>
///
/// Dispatch an import into `<dir>`. With `X-Xfer-Content-Length` a chunked
/// session is opened and its location returned; with `?source=` the server
/// fetches the artifact; otherwise the body is the whole artifact.
async fn start_import(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<ImportQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    dispatch_import(state, path, query, headers, body).await
}

/// POST /xfer/import
async fn start_import_at_root(
    State(state): State<AppState>,
    Query(query): Query<ImportQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    dispatch_import(state, String::new(), query, headers, body).await
}

async fn dispatch_import(
    state: AppState,
    target: String,
    query: ImportQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let flags = match header_str(&headers, HEADER_XFER_OPTIONS) {
        Some(options) => XferFlags::parse(options)?,
        None => XferFlags::default(),
    };

    let slug = header_str(&headers, HEADER_SLUG)
        .map(|slug| {
            urlencoding::decode(slug)
                .map(|decoded| decoded.into_owned())
                .map_err(|_| AppError::BadRequest(format!("Slug is not valid UTF-8: {}", slug)))
        })
        .transpose()?;

    let source = if let Some(source) = query.source {
        ImportSource::Remote {
            url: parse_source(&source)?,
        }
    } else if let Some(length) = header_str(&headers, HEADER_XFER_CONTENT_LENGTH) {
        let declared_length = length.trim().parse().map_err(|_| {
            AppError::BadRequest(format!("Invalid {}: {}", HEADER_XFER_CONTENT_LENGTH, length))
        })?;
        ImportSource::Chunked { declared_length }
    } else {
        ImportSource::Body
    };

    let request = ImportRequest {
        target,
        source,
        flags,
        slug,
        content_type: header_str(&headers, header::CONTENT_TYPE.as_str()).map(str::to_string),
    };

    match state.controller().import(request, body).await? {
        Imported::Started(session) => {
            tracing::info!(
                session_id = %session.id,
                destination = %session.destination.key(),
                declared_length = session.declared_length,
                "Import session opened"
            );
            let location = session_location(session.id);
            Ok((
                StatusCode::OK,
                [(header::LOCATION, location)],
                Json(SessionResponse::from(&session)),
            )
                .into_response())
        }
        Imported::Dispatched(dispatched) => Ok(dispatched_response(dispatched)),
    }
}

/// PUT /xfer/import/<session>
///
/// Append one chunk. Answers 308 with `Range` while bytes are missing and
/// 201 (or 202 for long-running completion work) once the artifact is whole.
async fn append_chunk(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let session_id = session_id.trim_matches('/');

    let range = match header_str(&headers, header::CONTENT_RANGE.as_str()) {
        Some(value) => ByteRange::parse(value).map_err(TransferError::from)?,
        None if body.is_empty() => ByteRange::empty(),
        None => {
            return Err(TransferError::MalformedRange("missing Content-Range header".to_string()).into())
        }
    };

    match state.controller().append_chunk(session_id, range, body).await? {
        ChunkAccepted::Continue {
            session_id,
            received,
            declared_length,
        } => {
            let mut response = (
                StatusCode::PERMANENT_REDIRECT,
                Json(ChunkResponse {
                    session_id: session_id.to_string(),
                    received,
                    declared_length,
                    complete: false,
                }),
            )
                .into_response();
            insert_range(&mut response, received);
            Ok(response)
        }
        ChunkAccepted::Finished(dispatched) => Ok(dispatched_response(dispatched)),
    }
}

/// GET /xfer/import/<session>
///
/// Report how much of an upload has arrived, so a client can resume.
async fn session_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Response> {
    let session = state
        .controller()
        .session_status(session_id.trim_matches('/'))
        .await?;

    let mut response = Json(SessionResponse::from(&session)).into_response();
    insert_range(&mut response, session.received);
    Ok(response)
}

/// DELETE /xfer/import/<session>
///
/// Abandon an upload and release its scratch storage. Idempotent.
async fn abandon_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode> {
    state
        .controller()
        .abandon(session_id.trim_matches('/'))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Export Handler
// ============================================================================

/// GET /xfer/export/<dir>.zip
///
/// Stream a zip of `<dir>`. The archive is built while it is sent.
async fn export(State(state): State<AppState>, Path(path): Path<String>) -> Result<Response> {
    let archive = state.controller().export(&path).await?;

    let disposition = format!(
        "attachment; filename=\"{}\"",
        archive.file_name.replace(['"', '\\'], "_")
    );

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        archive.body,
    )
        .into_response())
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    session_id: String,
    location: String,
    destination: String,
    declared_length: u64,
    received: u64,
    progress: f64,
    created_at: chrono::DateTime<chrono::Utc>,
    last_activity: chrono::DateTime<chrono::Utc>,
}

impl From<&TransferSession> for SessionResponse {
    fn from(session: &TransferSession) -> Self {
        Self {
            session_id: session.id.to_string(),
            location: session_location(session.id),
            destination: session.destination.key(),
            declared_length: session.declared_length,
            received: session.received,
            progress: session.progress(),
            created_at: session.created_at,
            last_activity: session.last_activity,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChunkResponse {
    session_id: String,
    received: u64,
    declared_length: u64,
    complete: bool,
}

/// 201 with the created resource, or 202 with the task to poll
fn dispatched_response(dispatched: Dispatched) -> Response {
    match dispatched {
        Dispatched::Done(outcome) => (
            StatusCode::CREATED,
            [(header::LOCATION, outcome.location.clone())],
            Json(outcome),
        )
            .into_response(),
        Dispatched::Tracked(task) => (
            StatusCode::ACCEPTED,
            [(header::LOCATION, format!("/task/{}", task.id))],
            Json(task),
        )
            .into_response(),
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn session_location(id: Uuid) -> String {
    format!("{}/{}", IMPORT_LOCATION_PREFIX, id)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn insert_range(response: &mut Response, received: u64) {
    if let Some(range) = resume_range(received) {
        if let Ok(value) = HeaderValue::from_str(&range) {
            response.headers_mut().insert(header::RANGE, value);
        }
    }
}
