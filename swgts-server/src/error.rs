//! Error types for the SWGTS server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use swgts_core::{JobError, ShapeError};
use tracing::error;

use crate::store::StoreError;

/// Server error types
///
/// Capacity and busy outcomes are not errors; see [`crate::admission::Admission`]
/// and [`crate::context::CloseOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Malformed or ill-shaped request body
    #[error("{0}")]
    Validation(String),

    /// Context missing or expired
    #[error("No such context.")]
    NotFound,

    /// A claimed job record was missing or could not be decoded
    #[error("Corrupt job {job}: {reason}")]
    CorruptJob { job: String, reason: String },

    /// Shared store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Filesystem failure while finalizing output
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Inconsistent shared state
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn corrupt_job(job: impl ToString, reason: impl ToString) -> Self {
        Self::CorruptJob {
            job: job.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<ShapeError> for ServerError {
    fn from(err: ShapeError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<JobError> for ServerError {
    fn from(err: JobError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::Validation(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound => StatusCode::NOT_FOUND,
            ServerError::CorruptJob { .. }
            | ServerError::Store(_)
            | ServerError::Io(_)
            | ServerError::Internal(_) => {
                error!(error = %self, "Request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({ "message": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ServerError::validation("bad"), StatusCode::BAD_REQUEST),
            (ServerError::NotFound, StatusCode::NOT_FOUND),
            (ServerError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (
                ServerError::corrupt_job("abc", "empty"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn test_shape_error_is_validation() {
        let err: ServerError = ShapeError::ReadArity(3).into();
        assert!(matches!(err, ServerError::Validation(_)));
        assert_eq!(err.to_string(), "a read must have exactly 4 lines, got 3");
    }
}
