use thiserror::Error;

#[derive(Debug, Error)]
pub enum UserError {
    #[error("no status record for user {0}")]
    NotFound(i64),

    #[error(transparent)]
    Database(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, UserError>;
