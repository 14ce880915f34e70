use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use tracing::{info, warn};

use conduit_core::types::PipelineJob;

use crate::{
    db::init_db,
    error::{Result, WalError},
    types::{QueueStatus, QueuedJob},
};

/// Durable FIFO job queue backed by SQLite.
///
/// Workers call [`reserve`](WalQueue::reserve) to lease the oldest pending
/// job, process it, then [`ack`](WalQueue::ack) on success or
/// [`nack`](WalQueue::nack) to return it to the pending pool for retry. A
/// job whose lease expires without an ack is implicitly reclaimable by the
/// next `reserve` call, so a crashed worker never strands a job forever.
pub struct WalQueue {
    conn: Arc<Mutex<Connection>>,
    default_lease_ms: u64,
    max_attempts: u32,
}

impl WalQueue {
    pub fn new(conn: Connection, default_lease_ms: u64, max_attempts: u32) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            default_lease_ms,
            max_attempts,
        })
    }

    /// Enqueue `job`. Idempotent on `job.job_id` — a retry with the same
    /// job is a no-op rather than a duplicate delivery.
    pub fn enqueue(&self, job: &PipelineJob) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let payload = serde_json::to_string(job)?;
        let n = conn.execute(
            "INSERT OR IGNORE INTO wal_jobs
             (job_id, user_id, chat_id, payload, status, attempts, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?5)",
            rusqlite::params![
                job.job_id.to_string(),
                job.user_id.0,
                job.chat_id.0,
                payload,
                now.to_rfc3339(),
            ],
        )?;
        if n == 0 {
            info!(job_id = %job.job_id, "duplicate enqueue ignored");
        }
        Ok(())
    }

    /// Reserve the oldest pending job (or a job whose lease has expired),
    /// leasing it to `worker_id` for `lease_ms` milliseconds.
    pub fn reserve(&self, worker_id: &str, lease_ms: Option<u64>) -> Result<Option<QueuedJob>> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let lease_ms = lease_ms.unwrap_or(self.default_lease_ms);
        let lease_until = now + chrono::Duration::milliseconds(lease_ms as i64);

        let row: Option<(String, String, i64)> = conn
            .query_row(
                "SELECT job_id, payload, attempts FROM wal_jobs
                 WHERE status = 'pending'
                    OR (status = 'reserved' AND lease_until < ?1)
                 ORDER BY created_at ASC
                 LIMIT 1",
                [now.to_rfc3339()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((job_id, payload, attempts)) = row else {
            return Ok(None);
        };

        if attempts as u32 >= self.max_attempts {
            conn.execute(
                "UPDATE wal_jobs SET status = 'dead_lettered', updated_at = ?2 WHERE job_id = ?1",
                rusqlite::params![job_id, now.to_rfc3339()],
            )?;
            warn!(%job_id, attempts, "job exceeded max attempts, dead-lettered");
            return Ok(None);
        }

        let new_attempts = attempts + 1;
        conn.execute(
            "UPDATE wal_jobs
             SET status = 'reserved', reserved_by = ?2, lease_until = ?3,
                 attempts = ?4, updated_at = ?5
             WHERE job_id = ?1",
            rusqlite::params![
                job_id,
                worker_id,
                lease_until.to_rfc3339(),
                new_attempts,
                now.to_rfc3339(),
            ],
        )?;

        let job: PipelineJob = serde_json::from_str(&payload)?;
        Ok(Some(QueuedJob {
            job,
            status: QueueStatus::Reserved,
            attempts: new_attempts as u32,
            reserved_by: Some(worker_id.to_string()),
            lease_until: Some(lease_until),
            created_at: now,
            updated_at: now,
        }))
    }

    /// Mark a reserved job as successfully processed.
    pub fn ack(&self, job_id: &str, worker_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        self.assert_owned(&conn, job_id, worker_id)?;
        conn.execute(
            "UPDATE wal_jobs SET status = 'done', updated_at = ?2 WHERE job_id = ?1",
            rusqlite::params![job_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Return a reserved job to the pending pool for retry.
    pub fn nack(&self, job_id: &str, worker_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        self.assert_owned(&conn, job_id, worker_id)?;
        conn.execute(
            "UPDATE wal_jobs
             SET status = 'pending', reserved_by = NULL, lease_until = NULL, updated_at = ?2
             WHERE job_id = ?1",
            rusqlite::params![job_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Depth of the pending pool, for backpressure / metrics.
    pub fn pending_count(&self) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM wal_jobs WHERE status = 'pending'",
            [],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    fn assert_owned(&self, conn: &Connection, job_id: &str, worker_id: &str) -> Result<()> {
        let owner: Option<String> = conn
            .query_row(
                "SELECT reserved_by FROM wal_jobs WHERE job_id = ?1",
                [job_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        match owner {
            Some(ref o) if o == worker_id => Ok(()),
            Some(_) => Err(WalError::NotOwned {
                job_id: job_id.to_string(),
                worker_id: worker_id.to_string(),
            }),
            None => Err(WalError::NotFound {
                job_id: job_id.to_string(),
            }),
        }
    }
}

/// Default lease: generous enough to cover a slow LLM call plus review
/// wait, short enough that a crashed worker's job is reclaimable quickly.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(120);

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::types::{ChatId, InboundMessage, UserId};
    use uuid::Uuid;

    fn sample_job() -> PipelineJob {
        let msg = InboundMessage {
            user_id: UserId(1),
            chat_id: ChatId(1),
            message_id: 1,
            text: "hi".to_string(),
            received_at: Utc::now(),
            recovered: None,
        };
        PipelineJob::from_batch(UserId(1), ChatId(1), vec![msg])
    }

    fn queue() -> WalQueue {
        WalQueue::new(Connection::open_in_memory().unwrap(), 1000, 3).unwrap()
    }

    #[test]
    fn enqueue_is_idempotent_on_job_id() {
        let q = queue();
        let job = sample_job();
        q.enqueue(&job).unwrap();
        q.enqueue(&job).unwrap();
        assert_eq!(q.pending_count().unwrap(), 1);
    }

    #[test]
    fn reserve_ack_round_trip() {
        let q = queue();
        let job = sample_job();
        q.enqueue(&job).unwrap();
        let reserved = q.reserve("worker-1", None).unwrap().unwrap();
        assert_eq!(reserved.job.job_id, job.job_id);
        assert_eq!(q.pending_count().unwrap(), 0);
        q.ack(&job.job_id.to_string(), "worker-1").unwrap();
        assert!(q.reserve("worker-1", None).unwrap().is_none());
    }

    #[test]
    fn nack_returns_job_to_pending() {
        let q = queue();
        let job = sample_job();
        q.enqueue(&job).unwrap();
        q.reserve("worker-1", None).unwrap();
        q.nack(&job.job_id.to_string(), "worker-1").unwrap();
        assert_eq!(q.pending_count().unwrap(), 1);
    }

    #[test]
    fn ack_by_non_owner_is_rejected() {
        let q = queue();
        let job = sample_job();
        q.enqueue(&job).unwrap();
        q.reserve("worker-1", None).unwrap();
        let err = q.ack(&job.job_id.to_string(), "worker-2").unwrap_err();
        assert!(matches!(err, WalError::NotOwned { .. }));
    }

    #[test]
    fn expired_lease_is_reclaimable() {
        let q = queue();
        let job = sample_job();
        q.enqueue(&job).unwrap();
        q.reserve("worker-1", Some(0)).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let reclaimed = q.reserve("worker-2", None).unwrap();
        assert!(reclaimed.is_some());
    }
}
