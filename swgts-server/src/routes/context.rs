//! Upload context routes.
//!
//! Capacity outcomes are answered with a wait hint: a `Retry-After` header on
//! 413 and 422, a `Retry-After` body field on 503.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use swgts_core::PairGroup;
use tracing::{debug, info};
use uuid::Uuid;

use crate::admission::Admission;
use crate::context::CloseOutcome;
use crate::error::ServerError;
use crate::metrics;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateContextRequest {
    pub filenames: Vec<String>,
}

/// Unknown and malformed ids are both "no such context"
fn context_id(raw: &str) -> Result<Uuid, ServerError> {
    Uuid::parse_str(raw).map_err(|_| ServerError::NotFound)
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ServerError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ServerError::validation(rejection.body_text()))
}

fn with_retry_after(status: StatusCode, retry_after: f64, body: serde_json::Value) -> Response {
    let mut response = (status, Json(body)).into_response();
    if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
        response.headers_mut().insert(header::RETRY_AFTER, value);
    }
    response
}

/// Open a new upload context
///
/// POST /context/create
pub async fn create_context(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateContextRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let request = body(payload)?;
    let id = state.registry.create(&request.filenames).await?;
    metrics::CONTEXTS_CREATED_TOTAL.inc();
    info!(context = %id, pairs = request.filenames.len(), "Created context");
    Ok(Json(json!({ "context": id })))
}

/// Submit a batch of pair groups
///
/// POST /context/:id/reads
pub async fn submit_reads(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
    payload: Result<Json<Vec<PairGroup>>, JsonRejection>,
) -> Result<Response, ServerError> {
    let id = context_id(&raw_id)?;
    if !state.registry.exists(id).await? {
        return Err(ServerError::NotFound);
    }
    let batch = body(payload)?;

    let response = match state.admission.submit(id, batch).await? {
        Admission::Accepted {
            processed_reads,
            pending_bytes,
        } => Json(json!({
            "processed reads": processed_reads,
            "pending bytes": pending_bytes,
        }))
        .into_response(),
        Admission::BatchTooLarge {
            retry_after,
            processed_reads,
        } => with_retry_after(
            StatusCode::PAYLOAD_TOO_LARGE,
            retry_after,
            json!({
                "message": "Batch is larger than the maximum pending bytes, split it.",
                "processed reads": processed_reads,
            }),
        ),
        Admission::BufferExceeded {
            retry_after,
            pending_bytes,
            processed_reads,
        } => {
            debug!(context = %id, retry_after, "Buffer exceeded");
            with_retry_after(
                StatusCode::UNPROCESSABLE_ENTITY,
                retry_after,
                json!({
                    "message": "Buffer exceeded, retry later.",
                    "pending bytes": pending_bytes,
                    "processed reads": processed_reads,
                }),
            )
        }
    };

    Ok(response)
}

/// Finalize a context
///
/// POST /context/:id/close
pub async fn close_context(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> Result<Response, ServerError> {
    let id = context_id(&raw_id)?;

    let response = match state.registry.close(id, state.config.hands_off).await? {
        CloseOutcome::Closed { total, saved } => {
            metrics::CONTEXTS_CLOSED_TOTAL.inc();
            Json(json!({ "saved": saved, "total": total })).into_response()
        }
        CloseOutcome::Busy {
            pending_bytes,
            retry_after,
        } => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "Retry-After": retry_after,
                "message": format!("{} bytes are still being filtered.", pending_bytes),
            })),
        )
            .into_response(),
    };

    Ok(response)
}

/// Context counters
///
/// GET /context/:id
pub async fn context_status(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> Result<Response, ServerError> {
    let id = context_id(&raw_id)?;
    let status = state.registry.status(id).await?;
    Ok(Json(status).into_response())
}
