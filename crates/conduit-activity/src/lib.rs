//! `conduit-activity` — adaptive window batching over raw inbound messages.
//!
//! Sits between a `Transport` and the WAL job queue: bursts of messages
//! from one user are coalesced into a single `PipelineJob` so the
//! pipeline sees one coherent turn instead of replaying on every keystroke.

pub mod db;
pub mod error;
pub mod tracker;
pub mod types;

pub use error::{ActivityError, Result};
pub use tracker::{ActivityTracker, IngestOutcome};
pub use types::BatchingParams;
