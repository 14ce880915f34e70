//! Uniform `{"error":{"code","message"}}` envelope for every HTTP handler.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use conduit_memory::MemoryError;
use conduit_quarantine::QuarantineError;
use conduit_recovery::RecoveryError;
use conduit_review::ReviewError;
use conduit_users::UserError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] conduit_core::CoreError),

    #[error(transparent)]
    Review(#[from] ReviewError),

    #[error(transparent)]
    Quarantine(#[from] QuarantineError),

    #[error(transparent)]
    User(#[from] UserError),

    #[error(transparent)]
    Activity(#[from] conduit_activity::error::ActivityError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Recovery(#[from] RecoveryError),

    #[error("unauthorized")]
    Unauthorized,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::Core(e) => e.code(),
            ApiError::Review(e) => match e {
                ReviewError::NotFound(_) => "NOT_FOUND",
                ReviewError::InvalidTransition { .. } => "ILLEGAL_TRANSITION",
                ReviewError::UnknownEditTag(_) => "VALIDATION_ERROR",
                ReviewError::Database(_) | ReviewError::Serialization(_) => "INTERNAL_ERROR",
            },
            ApiError::Quarantine(e) => match e {
                QuarantineError::MessageNotFound(_) => "NOT_FOUND",
                QuarantineError::Database(_) => "INTERNAL_ERROR",
            },
            ApiError::User(e) => match e {
                UserError::NotFound(_) => "NOT_FOUND",
                UserError::Database(_) => "INTERNAL_ERROR",
            },
            ApiError::Activity(_) => "INTERNAL_ERROR",
            ApiError::Memory(_) => "INTERNAL_ERROR",
            ApiError::Recovery(_) => "INTERNAL_ERROR",
            ApiError::Unauthorized => "UNAUTHORIZED",
            ApiError::RateLimited => "RATE_LIMITED",
            ApiError::BadRequest(_) => "VALIDATION_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Core(e) => StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            ApiError::Review(ReviewError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Review(ReviewError::InvalidTransition { .. }) => StatusCode::CONFLICT,
            ApiError::Review(ReviewError::UnknownEditTag(_)) => StatusCode::BAD_REQUEST,
            ApiError::Review(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Quarantine(QuarantineError::MessageNotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Quarantine(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::User(UserError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::User(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Activity(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Memory(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Recovery(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
