//! `/reviews` — the queue a human reviewer drains.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use conduit_core::types::{CtaMetadata, CustomerStatus, ReviewItem};
use conduit_review::ApprovalEdits;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PendingQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    20
}

pub async fn pending(
    State(state): State<Arc<AppState>>,
    Query(q): Query<PendingQuery>,
) -> ApiResult<Json<Vec<ReviewItem>>> {
    Ok(Json(state.review.pending(q.limit)?))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(review_id): Path<Uuid>,
) -> ApiResult<Json<ReviewItem>> {
    Ok(Json(state.review.get(review_id)?))
}

#[derive(Debug, Deserialize)]
pub struct ReviewingBody {
    pub reviewer_id: String,
}

pub async fn start_reviewing(
    State(state): State<Arc<AppState>>,
    Path(review_id): Path<Uuid>,
    Json(body): Json<ReviewingBody>,
) -> ApiResult<Json<ReviewItem>> {
    Ok(Json(state.review.start_reviewing(review_id, &body.reviewer_id)?))
}

pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(review_id): Path<Uuid>,
) -> ApiResult<Json<ReviewItem>> {
    Ok(Json(state.review.cancel(review_id)?))
}

#[derive(Debug, Deserialize)]
pub struct RejectBody {
    pub reason: Option<String>,
}

pub async fn reject(
    State(state): State<Arc<AppState>>,
    Path(review_id): Path<Uuid>,
    Json(body): Json<RejectBody>,
) -> ApiResult<Json<ReviewItem>> {
    Ok(Json(state.review.reject(review_id, body.reason.as_deref())?))
}

#[derive(Debug, Deserialize)]
pub struct ApproveBody {
    pub final_bubbles: Vec<String>,
    #[serde(default)]
    pub edit_tags: Vec<String>,
    pub quality_score: Option<u8>,
    pub cta: Option<CtaMetadata>,
    pub customer_status: Option<CustomerStatus>,
    #[serde(default)]
    pub ltv_delta_usd: f64,
    pub reviewer_notes: Option<String>,
}

/// Approves the draft and, when the reviewer recorded a status change or a
/// purchase, folds it into the LTV ledger in the same request. The two
/// writes aren't transactional across crates, but approval always runs
/// before the ledger update, so a crash between them only loses the ledger
/// side, never leaves a message stuck mid-approval.
pub async fn approve(
    State(state): State<Arc<AppState>>,
    Path(review_id): Path<Uuid>,
    Json(body): Json<ApproveBody>,
) -> ApiResult<Json<ReviewItem>> {
    let item = state.review.get(review_id)?;

    state.review.approve(
        review_id,
        ApprovalEdits {
            final_bubbles: body.final_bubbles,
            edit_tags: body.edit_tags,
            quality_score: body.quality_score,
            cta: body.cta,
            customer_status: body.customer_status,
            reviewer_notes: body.reviewer_notes,
        },
    )?;

    if body.customer_status.is_some() || body.ltv_delta_usd != 0.0 {
        let mut conn = state.users_conn.lock().await;
        conduit_users::store::apply_transition(
            &mut *conn,
            item.user_id,
            body.customer_status,
            body.ltv_delta_usd,
            Some("review_approval"),
            "reviewer",
        )?;
    }

    Ok(Json(state.review.get(review_id)?))
}
