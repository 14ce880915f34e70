use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use conduit_core::types::{ChatId, MessageCursor, RecoveryOperation, RecoveryStatus, UserId};

use crate::error::Result;

/// Creates the cursor and sweep-audit tables. Idempotent.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS message_cursors (
            user_id                             INTEGER PRIMARY KEY,
            chat_id                             INTEGER NOT NULL,
            last_processed_transport_message_id INTEGER NOT NULL,
            last_processed_at                   TEXT NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS recovery_operations (
            op_id               TEXT PRIMARY KEY,
            started_at          TEXT NOT NULL,
            finished_at         TEXT,
            users_scanned       INTEGER NOT NULL DEFAULT 0,
            messages_recovered  INTEGER NOT NULL DEFAULT 0,
            errors              INTEGER NOT NULL DEFAULT 0,
            status              TEXT NOT NULL
        ) STRICT;
        ",
    )?;
    Ok(())
}

/// A cursor plus the chat it belongs to, since `scan_history` needs both.
#[derive(Debug, Clone)]
pub struct CursorRow {
    pub chat_id: ChatId,
    pub cursor: MessageCursor,
}

pub fn list_cursors(conn: &Connection) -> Result<Vec<CursorRow>> {
    let mut stmt = conn.prepare(
        "SELECT user_id, chat_id, last_processed_transport_message_id, last_processed_at
         FROM message_cursors",
    )?;
    let rows = stmt
        .query_map([], |row| {
            let user_id: i64 = row.get(0)?;
            let chat_id: i64 = row.get(1)?;
            let last_processed_transport_message_id: i64 = row.get(2)?;
            let last_processed_at: String = row.get(3)?;
            Ok((user_id, chat_id, last_processed_transport_message_id, last_processed_at))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows
        .into_iter()
        .map(|(user_id, chat_id, last_id, at)| CursorRow {
            chat_id: ChatId(chat_id),
            cursor: MessageCursor {
                user_id: UserId(user_id),
                last_processed_transport_message_id: last_id,
                last_processed_at: DateTime::parse_from_rfc3339(&at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            },
        })
        .collect())
}

pub fn upsert_cursor(
    conn: &Connection,
    user_id: UserId,
    chat_id: ChatId,
    last_processed_transport_message_id: i64,
    last_processed_at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO message_cursors (user_id, chat_id, last_processed_transport_message_id, last_processed_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(user_id) DO UPDATE SET
            chat_id = excluded.chat_id,
            last_processed_transport_message_id = excluded.last_processed_transport_message_id,
            last_processed_at = excluded.last_processed_at",
        params![
            user_id.0,
            chat_id.0,
            last_processed_transport_message_id,
            last_processed_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn get_cursor(conn: &Connection, user_id: UserId) -> Result<Option<MessageCursor>> {
    let row: Option<(i64, String)> = conn
        .query_row(
            "SELECT last_processed_transport_message_id, last_processed_at
             FROM message_cursors WHERE user_id = ?1",
            params![user_id.0],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;

    Ok(row.map(|(last_id, at)| MessageCursor {
        user_id,
        last_processed_transport_message_id: last_id,
        last_processed_at: DateTime::parse_from_rfc3339(&at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    }))
}

pub fn delete_cursor(conn: &Connection, user_id: UserId) -> Result<()> {
    conn.execute("DELETE FROM message_cursors WHERE user_id = ?1", params![user_id.0])?;
    Ok(())
}

pub fn insert_operation(conn: &Connection, op_id: Uuid, started_at: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "INSERT INTO recovery_operations (op_id, started_at, status) VALUES (?1, ?2, ?3)",
        params![op_id.to_string(), started_at.to_rfc3339(), "running"],
    )?;
    Ok(())
}

pub fn finish_operation(conn: &Connection, op: &RecoveryOperation) -> Result<()> {
    let status = match op.status {
        RecoveryStatus::Running => "running",
        RecoveryStatus::Completed => "completed",
        RecoveryStatus::Halted => "halted",
    };
    conn.execute(
        "UPDATE recovery_operations SET
            finished_at = ?1, users_scanned = ?2, messages_recovered = ?3,
            errors = ?4, status = ?5
         WHERE op_id = ?6",
        params![
            op.finished_at.map(|dt| dt.to_rfc3339()),
            op.users_scanned,
            op.messages_recovered,
            op.errors,
            status,
            op.op_id.to_string(),
        ],
    )?;
    Ok(())
}
