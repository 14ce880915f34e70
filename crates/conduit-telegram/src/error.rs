use conduit_transport::TransportError;
use teloxide::{ApiError, RequestError};

/// Errors raised before a `teloxide::Bot` call is even attempted.
#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    #[error("no bot token configured")]
    NoToken,
}

/// Classifies a teloxide request failure as permanent (forbidden, deleted
/// chat — do not retry) or transient (network blips, rate limiting).
pub fn classify_send_error(err: RequestError, reason_prefix: &str) -> TransportError {
    let permanent = matches!(
        &err,
        RequestError::Api(ApiError::BotBlocked)
            | RequestError::Api(ApiError::ChatNotFound)
            | RequestError::Api(ApiError::UserDeactivated)
            | RequestError::Api(ApiError::BotKicked)
            | RequestError::Api(ApiError::NotEnoughRightsToPostMessages)
    );
    TransportError::SendFailed {
        reason: format!("{reason_prefix}: {err}"),
        permanent,
    }
}

pub fn classify_resolve_error(err: RequestError, user_id: i64) -> TransportError {
    let permanent = matches!(
        &err,
        RequestError::Api(ApiError::ChatNotFound) | RequestError::Api(ApiError::UserDeactivated)
    );
    TransportError::ResolveFailed {
        user_id,
        reason: err.to_string(),
        permanent,
    }
}
