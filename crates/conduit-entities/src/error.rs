use thiserror::Error;

#[derive(Debug, Error)]
pub enum EntityError {
    #[error(transparent)]
    Transport(#[from] conduit_transport::TransportError),
}

pub type Result<T> = std::result::Result<T, EntityError>;
