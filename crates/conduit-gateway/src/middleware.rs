//! Auth + rate-limit guards, one per endpoint class, wired onto their
//! route groups in `main.rs` via `axum::middleware::from_fn_with_state`.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;

use crate::auth::check_auth;
use crate::error::ApiError;
use crate::ratelimit::RateClass;
use crate::state::AppState;

async fn guard(
    state: &Arc<AppState>,
    headers: &HeaderMap,
    class: RateClass,
) -> Result<(), ApiError> {
    let token = check_auth(headers, &state.config.review_api.token)?;
    if !state.limiter.allow(&token, class) {
        return Err(ApiError::RateLimited);
    }
    Ok(())
}

macro_rules! guard_fn {
    ($name:ident, $class:expr) => {
        pub async fn $name(
            State(state): State<Arc<AppState>>,
            headers: HeaderMap,
            req: Request,
            next: Next,
        ) -> Response {
            match guard(&state, &headers, $class).await {
                Ok(()) => next.run(req).await,
                Err(e) => axum::response::IntoResponse::into_response(e),
            }
        }
    };
}

guard_fn!(guard_pending, RateClass::Pending);
guard_fn!(guard_mutating, RateClass::Mutating);
guard_fn!(guard_quarantine, RateClass::Quarantine);
