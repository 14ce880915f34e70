use rusqlite::Connection;

use crate::error::Result;

/// Initialise the job queue schema in `conn`.
///
/// `job_id` is the primary key so `INSERT OR IGNORE` gives us dedup for
/// free on re-enqueue. The `status, lease_until` index backs both the
/// reservation query and the lease-expiry sweep.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS wal_jobs (
            job_id       TEXT    NOT NULL PRIMARY KEY,
            user_id      INTEGER NOT NULL,
            chat_id      INTEGER NOT NULL,
            payload      TEXT    NOT NULL,   -- JSON-encoded PipelineJob
            status       TEXT    NOT NULL DEFAULT 'pending',
            attempts     INTEGER NOT NULL DEFAULT 0,
            reserved_by  TEXT,
            lease_until  TEXT,               -- ISO-8601 or NULL
            created_at   TEXT    NOT NULL,
            updated_at   TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_wal_jobs_status_lease
            ON wal_jobs (status, lease_until);
        CREATE INDEX IF NOT EXISTS idx_wal_jobs_user
            ON wal_jobs (user_id, created_at);
        ",
    )?;
    Ok(())
}
