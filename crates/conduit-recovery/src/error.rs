use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error(transparent)]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Transport(#[from] conduit_transport::TransportError),

    #[error("sweep halted after {0} consecutive user errors")]
    Halted(u32),
}

pub type Result<T> = std::result::Result<T, RecoveryError>;
