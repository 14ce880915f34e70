use rusqlite::Connection;

use crate::error::Result;

/// Initialise memory tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS user_memory (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     INTEGER NOT NULL,
            category    TEXT NOT NULL,
            key         TEXT NOT NULL,
            value       TEXT NOT NULL,
            confidence  REAL NOT NULL DEFAULT 0.8,
            source      TEXT NOT NULL DEFAULT 'inferred',
            expires_at  TEXT,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL,
            UNIQUE(user_id, category, key)
        );
        CREATE INDEX IF NOT EXISTS idx_memory_user ON user_memory(user_id);

        CREATE TABLE IF NOT EXISTS conversation_turns (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     INTEGER NOT NULL,
            role        TEXT NOT NULL,
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_turns_user
            ON conversation_turns(user_id, created_at);

        CREATE TABLE IF NOT EXISTS history_digests (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     INTEGER NOT NULL,
            level       TEXT NOT NULL,
            window_label TEXT NOT NULL,
            summary     TEXT NOT NULL,
            turn_count  INTEGER NOT NULL,
            created_at  TEXT NOT NULL,
            UNIQUE(user_id, level, window_label)
        );
        CREATE INDEX IF NOT EXISTS idx_digests_user
            ON history_digests(user_id, created_at);",
    )?;
    Ok(())
}
