use axum::{extract::State, Json};
use serde_json::json;
use std::sync::Arc;

use crate::error::ServerError;
use crate::keys::STATS_BASES;
use crate::state::AppState;

/// Version, uptime and capacity
///
/// GET /server-status
pub async fn server_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let processed_bases = state.store.get_i64(STATS_BASES).await?.unwrap_or(0);

    let mut status = json!({
        "version": env!("CARGO_PKG_VERSION"),
        "commit": option_env!("SWGTS_GIT_COMMIT").unwrap_or("unknown"),
        "uptime": state.uptime_secs(),
        "maximum pending bytes": state.config.max_pending_bytes,
        "processed bases": processed_bases,
    });
    if let Some(workers) = &state.workers {
        status["workers"] = json!(workers.snapshot());
    }

    Ok(Json(status))
}
