//! Bearer-token check shared by every Review API route.

use axum::http::HeaderMap;

use crate::error::{ApiError, ApiResult};

/// Extracts the `Authorization: Bearer <token>` header and checks it
/// against the configured review-api token. A single shared secret, not a
/// per-reviewer credential store — token issuance is out of scope here.
pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

pub fn check_auth(headers: &HeaderMap, expected_token: &str) -> ApiResult<String> {
    match extract_bearer(headers) {
        Some(token) if token == expected_token => Ok(token.to_string()),
        _ => Err(ApiError::Unauthorized),
    }
}
