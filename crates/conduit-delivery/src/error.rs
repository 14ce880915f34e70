use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Transport(#[from] conduit_transport::TransportError),

    #[error(transparent)]
    Entity(#[from] conduit_entities::EntityError),

    #[error(transparent)]
    Memory(#[from] conduit_memory::MemoryError),

    #[error(transparent)]
    Review(#[from] conduit_review::ReviewError),

    #[error(transparent)]
    Recovery(#[from] conduit_recovery::RecoveryError),
}

pub type Result<T> = std::result::Result<T, DeliveryError>;
