//! `conduit-wal` — durable, dedup'd job queue backed by SQLite.
//!
//! Every coalesced batch of inbound messages becomes a `PipelineJob`
//! (defined in `conduit-core`) that gets written here before any worker
//! touches it. Supervisor workers `reserve` a lease, process the job, and
//! `ack`/`nack` it — a crash mid-processing leaves the job reservable by
//! another worker once its lease expires, so no inbound batch is silently
//! dropped.

pub mod db;
pub mod error;
pub mod queue;
pub mod types;

pub use error::{Result, WalError};
pub use queue::{WalQueue, DEFAULT_LEASE};
pub use types::{QueueStatus, QueuedJob};
