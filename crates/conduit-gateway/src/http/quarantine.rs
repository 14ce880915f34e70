//! `/quarantine` — listing and releasing diverted messages.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use conduit_core::types::QuarantineMessage;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    user_id: Option<i64>,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListQuery>,
) -> ApiResult<Json<Vec<QuarantineMessage>>> {
    let messages = match q.user_id {
        Some(uid) => state.quarantine.list_for_user(conduit_core::types::UserId(uid))?,
        None => state.quarantine.list_all()?,
    };
    Ok(Json(messages))
}

/// Releases one quarantined message and re-injects it into the live
/// pipeline as if it had just arrived, so it goes through the normal
/// batching/priority path rather than jumping the queue.
pub async fn release(
    State(state): State<Arc<AppState>>,
    Path(q_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let msg = state.quarantine.release(q_id)?;
    let outcome = state.activity.on_inbound(msg)?;
    Ok(Json(serde_json::json!({ "outcome": format!("{outcome:?}") })))
}
