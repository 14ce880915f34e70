pub mod db;
pub mod error;
pub mod manager;
pub mod types;

pub use error::{MemoryError, Result};
pub use manager::MemoryStore;
pub use types::{CompressionLevel, HistoryDigest, MemoryCategory, MemoryContext, MemorySource, StoredTurn, UserMemory};
