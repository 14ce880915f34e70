//! Per-credential, per-endpoint-class token bucket. No donor file
//! implements HTTP rate limiting; this is written fresh, sized from
//! `ReviewApiConfig`'s three `*_rate_limit_per_min` fields, in the
//! small-struct-plus-`DashMap` shape `conduit-entities::EntityCache` and
//! `conduit-quarantine::StatusCache` already use for per-key state.

use std::time::Instant;

use dashmap::DashMap;

use conduit_core::config::ReviewApiConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateClass {
    Pending,
    Mutating,
    Quarantine,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// One bucket per `(credential, class)` pair. The credential is always the
/// bearer token itself (single-tenant deployments share one token, so this
/// degenerates to one bucket per class — the per-credential limit for a
/// single reviewer API key).
pub struct RateLimiter {
    buckets: DashMap<(String, RateClass), Bucket>,
    limits: ReviewApiConfig,
}

impl RateLimiter {
    pub fn new(limits: ReviewApiConfig) -> Self {
        Self { buckets: DashMap::new(), limits }
    }

    fn capacity(&self, class: RateClass) -> f64 {
        match class {
            RateClass::Pending => self.limits.pending_rate_limit_per_min as f64,
            RateClass::Mutating => self.limits.mutating_rate_limit_per_min as f64,
            RateClass::Quarantine => self.limits.quarantine_rate_limit_per_min as f64,
        }
    }

    /// Consumes one token for `credential`/`class`, refilling continuously
    /// at `capacity / 60` tokens per second since the last check. Returns
    /// `false` when the bucket is empty.
    pub fn allow(&self, credential: &str, class: RateClass) -> bool {
        let capacity = self.capacity(class);
        let refill_per_sec = capacity / 60.0;
        let key = (credential.to_string(), class);
        let now = Instant::now();

        let mut entry = self.buckets.entry(key).or_insert_with(|| Bucket {
            tokens: capacity,
            last_refill: now,
        });

        let elapsed = now.duration_since(entry.last_refill).as_secs_f64();
        entry.tokens = (entry.tokens + elapsed * refill_per_sec).min(capacity);
        entry.last_refill = now;

        if entry.tokens >= 1.0 {
            entry.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ReviewApiConfig {
        ReviewApiConfig {
            bind: "127.0.0.1:0".into(),
            token: "t".into(),
            pending_rate_limit_per_min: 60,
            mutating_rate_limit_per_min: 60,
            quarantine_rate_limit_per_min: 60,
            request_deadline_secs: 15,
        }
    }

    #[test]
    fn exhausts_then_recovers_on_refill() {
        let limiter = RateLimiter::new(limits());
        for _ in 0..60 {
            assert!(limiter.allow("tok", RateClass::Pending));
        }
        assert!(!limiter.allow("tok", RateClass::Pending));
    }

    #[test]
    fn classes_are_independent() {
        let limiter = RateLimiter::new(limits());
        for _ in 0..60 {
            assert!(limiter.allow("tok", RateClass::Pending));
        }
        assert!(limiter.allow("tok", RateClass::Mutating));
    }
}
