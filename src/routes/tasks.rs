//! Task Routes
//!
//! Endpoints:
//! - GET /task/:id - Current task snapshot
//! - POST /task/:id/cancel - Request cancellation (advisory)
//! - DELETE /task/:id - Forget a task (idempotent)

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use crate::error::Result;
use crate::state::AppState;
use crate::tasks::Task;

/// Create the task router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:id", get(get_task).delete(remove_task))
        .route("/:id/cancel", post(cancel_task))
}

/// GET /task/:id
async fn get_task(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Task>> {
    Ok(Json(state.tasks().get(&id)?))
}

/// POST /task/:id/cancel
///
/// Marks the task cancelled. Work already past its last checkpoint still
/// completes; its result is then attached to the cancelled task.
async fn cancel_task(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Task>> {
    let task = state.tasks().cancel(&id)?;
    tracing::info!(task_id = %id, status = ?task.status, "Task cancellation requested");
    Ok(Json(task))
}

/// DELETE /task/:id
async fn remove_task(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    state.tasks().remove(&id);
    StatusCode::NO_CONTENT
}
