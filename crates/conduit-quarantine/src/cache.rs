//! Short-TTL cache over `ProtocolStatus.active`, consulted by the Activity
//! Tracker on every inbound message so a quarantine check never costs a
//! DB round-trip on the hot path.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use conduit_core::types::UserId;

pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

struct Entry {
    active: bool,
    inserted_at: Instant,
}

pub struct StatusCache {
    ttl: Duration,
    entries: DashMap<i64, Entry>,
}

impl StatusCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: DashMap::new() }
    }

    /// `None` means "not cached or stale" — caller must fall back to the
    /// store and `put` the freshly loaded value.
    pub fn get(&self, user_id: UserId) -> Option<bool> {
        let entry = self.entries.get(&user_id.0)?;
        if entry.inserted_at.elapsed() >= self.ttl {
            return None;
        }
        Some(entry.active)
    }

    pub fn put(&self, user_id: UserId, active: bool) {
        self.entries.insert(user_id.0, Entry { active, inserted_at: Instant::now() });
    }

    pub fn invalidate(&self, user_id: UserId) {
        self.entries.remove(&user_id.0);
    }
}

impl Default for StatusCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
