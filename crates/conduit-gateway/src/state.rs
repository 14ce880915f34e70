//! Shared process state handed to every HTTP handler.

use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Mutex as AsyncMutex;

use conduit_activity::ActivityTracker;
use conduit_core::config::ConduitConfig;
use conduit_entities::EntityCache;
use conduit_memory::MemoryStore;
use conduit_quarantine::QuarantineManager;
use conduit_review::ReviewQueue;
use conduit_transport::Transport;

use crate::ratelimit::RateLimiter;

/// Everything an HTTP handler needs, built once in `main` and shared via
/// `axum::extract::State`. Construction order in `main.rs` mirrors the
/// pipeline's own dependency order: store handles first, then the
/// subsystems built on top of them.
pub struct AppState {
    pub config: ConduitConfig,
    pub review: Arc<ReviewQueue>,
    pub quarantine: Arc<QuarantineManager>,
    pub activity: Arc<ActivityTracker>,
    pub memory: Arc<MemoryStore>,
    pub users_conn: AsyncMutex<Connection>,
    pub cursor_conn: AsyncMutex<Connection>,
    pub entities: Arc<EntityCache>,
    pub transport: Arc<dyn Transport>,
    pub limiter: Arc<RateLimiter>,
}
