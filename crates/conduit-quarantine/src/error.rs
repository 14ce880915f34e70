use thiserror::Error;

#[derive(Debug, Error)]
pub enum QuarantineError {
    #[error(transparent)]
    Database(#[from] rusqlite::Error),

    #[error("no quarantined message with id {0}")]
    MessageNotFound(uuid::Uuid),
}

pub type Result<T> = std::result::Result<T, QuarantineError>;
