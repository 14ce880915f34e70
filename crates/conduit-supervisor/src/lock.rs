//! Short-lived per-user processing lock. Two jobs for the same user can be
//! reserved by different workers at once (the WAL only serializes by job,
//! not by user); this keeps a second worker from mutating the same user's
//! memory/review state concurrently while the first is mid-pipeline.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use conduit_core::types::UserId;

struct Entry {
    job_id: String,
    acquired_at: Instant,
}

pub struct PerUserLock {
    ttl: Duration,
    held: DashMap<i64, Entry>,
}

impl PerUserLock {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, held: DashMap::new() }
    }

    /// Acquires the lock for `user_id` if it is free or its holder's lease
    /// expired. Keyed additionally by `job_id` so a worker retrying the
    /// same job after a crash can re-acquire its own lock rather than
    /// waiting out the TTL.
    pub fn acquire(&self, user_id: UserId, job_id: &str) -> bool {
        match self.held.entry(user_id.0) {
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Entry { job_id: job_id.to_string(), acquired_at: Instant::now() });
                true
            }
            dashmap::mapref::entry::Entry::Occupied(mut slot) => {
                let entry = slot.get();
                if entry.job_id == job_id || entry.acquired_at.elapsed() >= self.ttl {
                    slot.insert(Entry { job_id: job_id.to_string(), acquired_at: Instant::now() });
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn release(&self, user_id: UserId) {
        self.held.remove(&user_id.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_for_a_different_job_is_refused() {
        let lock = PerUserLock::new(Duration::from_secs(300));
        assert!(lock.acquire(UserId(1), "job-a"));
        assert!(!lock.acquire(UserId(1), "job-b"));
    }

    #[test]
    fn same_job_can_reacquire_idempotently() {
        let lock = PerUserLock::new(Duration::from_secs(300));
        assert!(lock.acquire(UserId(1), "job-a"));
        assert!(lock.acquire(UserId(1), "job-a"));
    }

    #[test]
    fn release_frees_the_slot_for_another_job() {
        let lock = PerUserLock::new(Duration::from_secs(300));
        assert!(lock.acquire(UserId(1), "job-a"));
        lock.release(UserId(1));
        assert!(lock.acquire(UserId(1), "job-b"));
    }

    #[test]
    fn expired_lease_is_reclaimable_by_another_job() {
        let lock = PerUserLock::new(Duration::from_millis(5));
        assert!(lock.acquire(UserId(1), "job-a"));
        std::thread::sleep(Duration::from_millis(20));
        assert!(lock.acquire(UserId(1), "job-b"));
    }
}
