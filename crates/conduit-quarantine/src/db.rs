use rusqlite::Connection;

use crate::error::Result;

/// Creates the quarantine subsystem's tables. Idempotent.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS protocol_status (
            user_id    INTEGER PRIMARY KEY,
            active     INTEGER NOT NULL DEFAULT 0,
            since      TEXT,
            reason     TEXT,
            performer  TEXT
        ) STRICT;

        CREATE TABLE IF NOT EXISTS quarantine_messages (
            q_id         TEXT PRIMARY KEY,
            user_id      INTEGER NOT NULL,
            chat_id      INTEGER NOT NULL,
            text         TEXT NOT NULL,
            received_at  TEXT NOT NULL,
            expires_at   TEXT NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_quarantine_messages_user
            ON quarantine_messages (user_id, received_at);

        CREATE INDEX IF NOT EXISTS idx_quarantine_messages_expiry
            ON quarantine_messages (expires_at);

        CREATE TABLE IF NOT EXISTS quarantine_audit_log (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     INTEGER NOT NULL,
            event       TEXT NOT NULL,
            detail      TEXT,
            performer   TEXT,
            at          TEXT NOT NULL
        ) STRICT;
        ",
    )?;
    Ok(())
}
