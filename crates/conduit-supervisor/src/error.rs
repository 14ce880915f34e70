use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Wal(#[from] conduit_wal::WalError),

    #[error(transparent)]
    Memory(#[from] conduit_memory::MemoryError),

    #[error(transparent)]
    Quarantine(#[from] conduit_quarantine::QuarantineError),

    #[error(transparent)]
    Review(#[from] conduit_review::ReviewError),

    #[error(transparent)]
    Users(#[from] conduit_users::UserError),
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
