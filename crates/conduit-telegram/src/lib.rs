//! `conduit-telegram` — concrete `conduit_transport::Transport`
//! implementation backed by a long-polling teloxide bot.

pub mod adapter;
pub mod error;
pub mod handler;
pub mod send;
pub mod typing;

pub use adapter::TelegramTransport;
pub use error::TelegramError;
pub use typing::TypingGuard;
