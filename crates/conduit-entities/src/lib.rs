//! `conduit-entities` — LRU+TTL cache over transport entity handles, so
//! delivery doesn't pay a cold resolve on every outbound message.

pub mod cache;
pub mod error;

pub use cache::EntityCache;
pub use error::{EntityError, Result};
