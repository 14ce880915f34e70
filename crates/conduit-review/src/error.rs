use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("no review item with id {0}")]
    NotFound(uuid::Uuid),

    #[error("cannot transition review {id} from {from} to {to}")]
    InvalidTransition { id: uuid::Uuid, from: String, to: String },

    #[error("unknown edit tag: {0}")]
    UnknownEditTag(String),

    #[error(transparent)]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ReviewError>;
