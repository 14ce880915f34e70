use rusqlite::Connection;

use crate::error::Result;

/// One open window per user survives here until it flushes, so a restart
/// doesn't silently drop buffered-but-unflushed messages.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS activity_buffers (
            user_id     INTEGER NOT NULL PRIMARY KEY,
            chat_id     INTEGER NOT NULL,
            messages    TEXT    NOT NULL,   -- JSON array of InboundMessage
            typing      INTEGER NOT NULL DEFAULT 0,
            deadline    TEXT    NOT NULL,
            generation  INTEGER NOT NULL DEFAULT 0,
            updated_at  TEXT    NOT NULL
        ) STRICT;
        ",
    )?;
    Ok(())
}
