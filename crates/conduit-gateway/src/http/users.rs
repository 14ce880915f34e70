//! `/users` — customer-status ledger, nicknames, quarantine toggling, and
//! GDPR erasure.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use conduit_core::types::{CustomerStatus, UserCurrentStatus, UserId};

use crate::error::ApiResult;
use crate::state::AppState;

pub async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> ApiResult<Json<UserCurrentStatus>> {
    let conn = state.users_conn.lock().await;
    Ok(Json(conduit_users::store::get_or_create_status(&conn, UserId(user_id))?))
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub customer_status: Option<CustomerStatus>,
    #[serde(default)]
    pub delta_ltv_usd: f64,
    pub reason: Option<String>,
    pub performer: String,
}

pub async fn post_status(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
    Json(body): Json<StatusBody>,
) -> ApiResult<Json<UserCurrentStatus>> {
    let mut conn = state.users_conn.lock().await;
    Ok(Json(conduit_users::store::apply_transition(
        &mut *conn,
        UserId(user_id),
        body.customer_status,
        body.delta_ltv_usd,
        body.reason.as_deref(),
        &body.performer,
    )?))
}

#[derive(Debug, Deserialize)]
pub struct NicknameBody {
    pub nickname: Option<String>,
}

pub async fn post_nickname(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
    Json(body): Json<NicknameBody>,
) -> ApiResult<Json<UserCurrentStatus>> {
    let conn = state.users_conn.lock().await;
    conduit_users::store::set_nickname(&conn, UserId(user_id), body.nickname.as_deref())?;
    Ok(Json(conduit_users::store::get_or_create_status(&conn, UserId(user_id))?))
}

#[derive(Debug, Deserialize)]
pub struct QuarantineBody {
    pub active: bool,
    pub reason: Option<String>,
    pub performer: String,
}

pub async fn post_quarantine(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
    Json(body): Json<QuarantineBody>,
) -> ApiResult<Json<conduit_core::types::ProtocolStatus>> {
    let uid = UserId(user_id);
    if body.active {
        state.quarantine.activate(uid, body.reason.as_deref(), &body.performer)?;
    } else {
        state.quarantine.deactivate(uid, body.reason.as_deref(), &body.performer)?;
    }
    Ok(Json(state.quarantine.status(uid)?))
}

/// GDPR erasure. Memory, quarantine history, and the recovery cursor are
/// hard-deleted — none of them carry analytics value once the user is gone.
/// Review interactions are anonymized instead of deleted by
/// `ReviewQueue::anonymize_user`, keeping aggregate quality/CTA metrics
/// intact under a tombstone id.
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    let uid = UserId(user_id);
    const TOMBSTONE: UserId = UserId(-1);

    state.memory.delete_user(user_id)?;
    state.quarantine.delete_user(uid)?;
    {
        let conn = state.cursor_conn.lock().await;
        conduit_recovery::db::delete_cursor(&conn, uid)?;
    }
    let anonymized = state.review.anonymize_user(uid, TOMBSTONE)?;

    Ok(Json(serde_json::json!({ "anonymized_reviews": anonymized })))
}
