//! Error types for the transfer server

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::tasks::TaskError;
use crate::transfer::TransferError;
use crate::upload::resume_range;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Transfer(#[from] TransferError),
}

impl From<TaskError> for AppError {
    fn from(err: TaskError) -> Self {
        AppError::Transfer(err.into())
    }
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut range = None;

        let (status, error_type, message) = match &self {
            AppError::BadRequest(msg) => {
                tracing::warn!("Bad request: {}", msg);
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone())
            }
            AppError::Transfer(e) => {
                range = e.resume_offset().and_then(resume_range);
                if e.is_internal() {
                    tracing::error!(code = e.code(), "Transfer failed: {}", e);
                    (e.status_code(), e.code(), "Transfer failed".to_string())
                } else {
                    tracing::warn!(code = e.code(), "Transfer rejected: {}", e);
                    (e.status_code(), e.code(), e.to_string())
                }
            }
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
            details: if cfg!(debug_assertions) {
                Some(self.to_string())
            } else {
                None
            },
        });

        match range {
            Some(range) => (status, [(header::RANGE, range)], body).into_response(),
            None => (status, body).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_mismatch_carries_resume_point() {
        let response = AppError::from(TransferError::RangeMismatch {
            expected: 65536,
            actual: 0,
        })
        .into_response();

        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[header::RANGE], "bytes 0-65535");
    }

    #[test]
    fn test_task_does_not_exist_is_not_found() {
        let response = AppError::from(TaskError::TaskDoesNotExist("abc".into())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_bad_request() {
        let response = AppError::BadRequest("Invalid x-xfer-content-length: ten".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get(header::RANGE).is_none());
    }

    #[test]
    fn test_internal_errors_are_masked() {
        let response = AppError::from(TransferError::Internal("disk on fire".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
