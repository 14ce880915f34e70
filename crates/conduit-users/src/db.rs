use rusqlite::Connection;

use crate::error::Result;

/// Creates the customer-status ledger tables. Idempotent.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS user_current_status (
            user_id         INTEGER PRIMARY KEY,
            customer_status TEXT    NOT NULL DEFAULT 'PROSPECT',
            ltv_total_usd   REAL    NOT NULL DEFAULT 0.0,
            nickname        TEXT
        ) STRICT;

        CREATE TABLE IF NOT EXISTS status_transitions (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     INTEGER NOT NULL,
            from_status TEXT,
            to_status   TEXT,
            delta_ltv   REAL NOT NULL DEFAULT 0.0,
            reason      TEXT,
            performer   TEXT NOT NULL,
            at          TEXT NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_status_transitions_user
            ON status_transitions (user_id, at);
        ",
    )?;
    Ok(())
}
