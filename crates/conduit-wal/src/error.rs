use thiserror::Error;

/// Errors raised by the durable job queue.
#[derive(Debug, Error)]
pub enum WalError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("job not found: {job_id}")]
    NotFound { job_id: String },

    #[error("job {job_id} is not reserved by worker {worker_id}")]
    NotOwned { job_id: String, worker_id: String },
}

pub type Result<T> = std::result::Result<T, WalError>;
