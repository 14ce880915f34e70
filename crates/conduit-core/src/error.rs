use thiserror::Error;

/// Error kinds shared across every crate in the workspace. Individual crates
/// may define narrower error enums for their own internals and convert into
/// this one at their public boundary (`#[from]`/`#[error(transparent)]`).
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration failed to load or validate. Fatal: the process refuses
    /// to start.
    #[error("configuration error: {0}")]
    Config(String),

    /// A persona blob was missing or empty at startup. Fatal.
    #[error("persona error: {0}")]
    Persona(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("transport error ({operation}): {reason}")]
    Transport { operation: String, reason: String },

    #[error("LLM provider error: {0}")]
    LlmProvider(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("illegal state transition: {0}")]
    IllegalTransition(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("request timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Stable string code used both in the HTTP error envelope
    /// and in log fields.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Config(_) => "CONFIG_ERROR",
            CoreError::Persona(_) => "PERSONA_ERROR",
            CoreError::Database(_) => "DATABASE_ERROR",
            CoreError::Transport { .. } => "TRANSPORT_ERROR",
            CoreError::LlmProvider(_) => "LLM_PROVIDER_ERROR",
            CoreError::Validation(_) => "VALIDATION_ERROR",
            CoreError::IllegalTransition(_) => "ILLEGAL_TRANSITION",
            CoreError::NotFound(_) => "NOT_FOUND",
            CoreError::Timeout { .. } => "TIMEOUT",
            CoreError::Serialization(_) => "SERIALIZATION_ERROR",
            CoreError::Io(_) => "IO_ERROR",
            CoreError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status this error kind maps to on the Review API.
    pub fn http_status(&self) -> u16 {
        match self {
            CoreError::Validation(_) => 400,
            CoreError::NotFound(_) => 404,
            CoreError::IllegalTransition(_) => 409,
            CoreError::Timeout { .. } => 504,
            _ => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
