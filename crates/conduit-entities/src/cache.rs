use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, info};

use conduit_core::types::UserId;
use conduit_transport::{EntityHandle, Transport};

use crate::error::Result;

/// Default TTL for a resolved entity handle before it is treated as stale
/// and re-resolved on next use.
const DEFAULT_TTL: Duration = Duration::from_secs(3600);
/// Hard cap on cache size; eviction drops the oldest half when exceeded.
const CACHE_MAX: usize = 1000;
/// How many of the most-recently-active users get pre-resolved at startup.
const WARMUP_N: usize = 100;

struct Entry {
    handle: EntityHandle,
    inserted_at: Instant,
}

/// Caches the opaque transport handle needed to address a user, so the
/// delivery path doesn't pay a cold `resolve_entity` round trip on every
/// send. Resolutions are warmed for the most recently active users at
/// startup and refreshed lazily past their TTL.
pub struct EntityCache {
    entries: DashMap<i64, Entry>,
    ttl: Duration,
    max_size: usize,
}

impl EntityCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            ttl: DEFAULT_TTL,
            max_size: CACHE_MAX,
        }
    }

    pub fn with_ttl(ttl: Duration, max_size: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_size,
        }
    }

    /// Return a cached, non-stale handle for `user_id`, resolving via
    /// `transport` and caching the result on a miss or stale hit.
    pub async fn get_or_resolve(
        &self,
        transport: &dyn Transport,
        user_id: UserId,
    ) -> Result<EntityHandle> {
        if let Some(entry) = self.entries.get(&user_id.0) {
            if entry.inserted_at.elapsed() < self.ttl {
                debug!(user_id = user_id.0, "entity cache hit");
                return Ok(entry.handle.clone());
            }
        }

        let handle = transport.resolve_entity(user_id).await?;
        self.insert(user_id, handle.clone());
        Ok(handle)
    }

    /// Pre-resolve the handles of up to `WARMUP_N` recently active users so
    /// the first send after startup doesn't pay a cold resolve.
    pub async fn warmup(&self, transport: &dyn Transport, user_ids: &[UserId]) {
        let mut resolved = 0;
        for &user_id in user_ids.iter().take(WARMUP_N) {
            match transport.resolve_entity(user_id).await {
                Ok(handle) => {
                    self.insert(user_id, handle);
                    resolved += 1;
                }
                Err(e) => debug!(user_id = user_id.0, error = %e, "warmup resolve failed"),
            }
        }
        info!(resolved, requested = user_ids.len().min(WARMUP_N), "entity cache warmed up");
    }

    pub fn invalidate(&self, user_id: UserId) {
        self.entries.remove(&user_id.0);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&self, user_id: UserId, handle: EntityHandle) {
        if self.entries.len() >= self.max_size {
            self.evict_oldest_half();
        }
        self.entries.insert(
            user_id.0,
            Entry {
                handle,
                inserted_at: Instant::now(),
            },
        );
    }

    fn evict_oldest_half(&self) {
        let mut by_age: Vec<(i64, Instant)> = self
            .entries
            .iter()
            .map(|e| (*e.key(), e.value().inserted_at))
            .collect();
        by_age.sort_by_key(|(_, t)| *t);
        let evict_count = by_age.len() / 2;
        for (key, _) in by_age.into_iter().take(evict_count) {
            self.entries.remove(&key);
        }
    }
}

impl Default for EntityCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conduit_core::types::ChatId;
    use conduit_transport::{HistoryMessage, TransportError, TransportStatus};

    struct FakeTransport;

    #[async_trait]
    impl Transport for FakeTransport {
        fn name(&self) -> &str {
            "fake"
        }
        async fn connect(&self) -> std::result::Result<(), TransportError> {
            Ok(())
        }
        async fn disconnect(&self) -> std::result::Result<(), TransportError> {
            Ok(())
        }
        fn status(&self) -> TransportStatus {
            TransportStatus::Connected
        }
        async fn send(&self, _chat_id: ChatId, _text: &str) -> std::result::Result<(), TransportError> {
            Ok(())
        }
        async fn set_typing(&self, _chat_id: ChatId, _is_typing: bool) -> std::result::Result<(), TransportError> {
            Ok(())
        }
        async fn scan_history(
            &self,
            _chat_id: ChatId,
            _since_message_id: i64,
            _limit: usize,
        ) -> std::result::Result<Vec<HistoryMessage>, TransportError> {
            Ok(Vec::new())
        }
        async fn resolve_entity(&self, user_id: UserId) -> std::result::Result<EntityHandle, TransportError> {
            Ok(EntityHandle(serde_json::json!({ "user_id": user_id.0 })))
        }
    }

    #[tokio::test]
    async fn resolves_and_caches() {
        let cache = EntityCache::new();
        let transport = FakeTransport;
        let h1 = cache.get_or_resolve(&transport, UserId(1)).await.unwrap();
        assert_eq!(h1.0["user_id"], 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn stale_entries_are_refreshed() {
        let cache = EntityCache::with_ttl(Duration::from_millis(5), CACHE_MAX);
        let transport = FakeTransport;
        cache.get_or_resolve(&transport, UserId(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let h = cache.get_or_resolve(&transport, UserId(1)).await.unwrap();
        assert_eq!(h.0["user_id"], 1);
    }

    #[tokio::test]
    async fn warmup_populates_cache() {
        let cache = EntityCache::new();
        let transport = FakeTransport;
        let ids: Vec<UserId> = (1..=5).map(UserId).collect();
        cache.warmup(&transport, &ids).await;
        assert_eq!(cache.len(), 5);
    }
}
