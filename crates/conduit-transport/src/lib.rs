pub mod backoff;
pub mod error;
pub mod transport;
pub mod types;

pub use backoff::{retry_with_backoff, Backoff};
pub use error::TransportError;
pub use transport::Transport;
pub use types::{EntityHandle, HistoryMessage, TransportStatus, TypingEvent};
