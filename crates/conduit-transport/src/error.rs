use thiserror::Error;

/// Errors a `Transport` implementation may raise. The `permanent` flag on
/// `SendFailed`/`ResolveFailed` distinguishes the two failure policies:
/// transient errors are retried with backoff, permanent ones (forbidden,
/// deleted chat) are not.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("send failed: {reason}")]
    SendFailed { reason: String, permanent: bool },

    #[error("resolve_entity failed for user {user_id}: {reason}")]
    ResolveFailed { user_id: i64, reason: String, permanent: bool },

    #[error("scan_history failed: {0}")]
    ScanFailed(String),

    #[error("operation timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl TransportError {
    pub fn is_permanent(&self) -> bool {
        match self {
            TransportError::SendFailed { permanent, .. } => *permanent,
            TransportError::ResolveFailed { permanent, .. } => *permanent,
            _ => false,
        }
    }
}
