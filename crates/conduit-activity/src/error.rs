use thiserror::Error;

#[derive(Debug, Error)]
pub enum ActivityError {
    #[error(transparent)]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Wal(#[from] conduit_wal::WalError),
}

pub type Result<T> = std::result::Result<T, ActivityError>;
