//! Quarantine manager: per-user silence protocol plus the store that
//! diverted messages land in while it's active.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

use conduit_core::types::{ChatId, InboundMessage, ProtocolStatus, QuarantineMessage, UserId};
use conduit_core::QuarantineGate;

use crate::cache::StatusCache;
use crate::db::init_db;
use crate::error::{QuarantineError, Result};

pub const DEFAULT_QUARANTINE_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Broadcast so long-lived workers (Activity Tracker instances, gateway
/// sessions) can refresh their local state without polling the store.
#[derive(Debug, Clone)]
pub struct ProtocolStatusChange {
    pub user_id: UserId,
    pub active: bool,
}

pub struct QuarantineManager {
    db: Mutex<Connection>,
    cache: StatusCache,
    quarantine_ttl: Duration,
    status_tx: broadcast::Sender<ProtocolStatusChange>,
}

impl QuarantineManager {
    pub fn new(conn: Connection, status_ttl: Duration, quarantine_ttl: Duration) -> Result<Arc<Self>> {
        init_db(&conn)?;
        let (status_tx, _) = broadcast::channel(64);
        Ok(Arc::new(Self {
            db: Mutex::new(conn),
            cache: StatusCache::new(status_ttl),
            quarantine_ttl,
            status_tx,
        }))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProtocolStatusChange> {
        self.status_tx.subscribe()
    }

    pub fn activate(&self, user_id: UserId, reason: Option<&str>, performer: &str) -> Result<()> {
        let now = Utc::now();
        let conn = self.db.lock().unwrap();
        conn.execute(
            "INSERT INTO protocol_status (user_id, active, since, reason, performer)
             VALUES (?1, 1, ?2, ?3, ?4)
             ON CONFLICT(user_id) DO UPDATE SET
                active = 1, since = excluded.since, reason = excluded.reason, performer = excluded.performer",
            params![user_id.0, now.to_rfc3339(), reason, performer],
        )?;
        audit(&conn, user_id, "activate", reason, performer, now)?;
        drop(conn);

        self.cache.put(user_id, true);
        let _ = self.status_tx.send(ProtocolStatusChange { user_id, active: true });
        info!(user_id = user_id.0, performer, "quarantine activated");
        Ok(())
    }

    pub fn deactivate(&self, user_id: UserId, reason: Option<&str>, performer: &str) -> Result<()> {
        let now = Utc::now();
        let conn = self.db.lock().unwrap();
        conn.execute(
            "INSERT INTO protocol_status (user_id, active, since, reason, performer)
             VALUES (?1, 0, NULL, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
                active = 0, since = NULL, reason = excluded.reason, performer = excluded.performer",
            params![user_id.0, reason, performer],
        )?;
        audit(&conn, user_id, "deactivate", reason, performer, now)?;
        drop(conn);

        self.cache.put(user_id, false);
        let _ = self.status_tx.send(ProtocolStatusChange { user_id, active: false });
        info!(user_id = user_id.0, performer, "quarantine deactivated");
        Ok(())
    }

    pub fn status(&self, user_id: UserId) -> Result<ProtocolStatus> {
        let conn = self.db.lock().unwrap();
        row_to_status(&conn, user_id)
    }

    /// Divert one message into the quarantine store.
    pub fn store_message(&self, msg: &InboundMessage) -> Result<QuarantineMessage> {
        let q = QuarantineMessage {
            q_id: Uuid::now_v7(),
            user_id: msg.user_id,
            chat_id: msg.chat_id,
            text: msg.text.clone(),
            received_at: msg.received_at,
            expires_at: msg.received_at + chrono::Duration::from_std(self.quarantine_ttl).unwrap(),
        };
        let conn = self.db.lock().unwrap();
        insert_message(&conn, &q)?;
        Ok(q)
    }

    /// Divert a whole drained buffer at once (used on activation, when the
    /// Activity Tracker hands back whatever it was holding for this user).
    pub fn store_many(&self, messages: &[InboundMessage]) -> Result<Vec<QuarantineMessage>> {
        messages.iter().map(|m| self.store_message(m)).collect()
    }

    /// Pulls a quarantined message back out, synthesizing the
    /// `InboundMessage` the caller should re-inject into the Activity
    /// Tracker. `received_at` is preserved from the original message so its
    /// priority is computed as if it had just arrived.
    pub fn release(&self, q_id: Uuid) -> Result<InboundMessage> {
        let conn = self.db.lock().unwrap();
        let row: Option<(i64, i64, String, String)> = conn
            .query_row(
                "SELECT user_id, chat_id, text, received_at FROM quarantine_messages WHERE q_id = ?1",
                params![q_id.to_string()],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .optional()?;

        let (user_id, chat_id, text, received_at) =
            row.ok_or(QuarantineError::MessageNotFound(q_id))?;

        conn.execute("DELETE FROM quarantine_messages WHERE q_id = ?1", params![q_id.to_string()])?;
        audit(&conn, UserId(user_id), "release", None, "system", Utc::now())?;

        Ok(InboundMessage {
            user_id: UserId(user_id),
            chat_id: ChatId(chat_id),
            message_id: 0,
            text,
            received_at: chrono::DateTime::parse_from_rfc3339(&received_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            recovered: None,
        })
    }

    pub fn list_for_user(&self, user_id: UserId) -> Result<Vec<QuarantineMessage>> {
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT q_id, chat_id, text, received_at, expires_at
             FROM quarantine_messages WHERE user_id = ?1 ORDER BY received_at ASC",
        )?;
        let rows = stmt
            .query_map(params![user_id.0], |row| row_to_message(user_id, row))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// GDPR erasure: drops every quarantined message and the protocol
    /// status row for this user. Unlike the review store, nothing here is
    /// worth anonymizing and keeping — a quarantine record has no
    /// analytics value once the user is gone.
    pub fn delete_user(&self, user_id: UserId) -> Result<()> {
        let conn = self.db.lock().unwrap();
        conn.execute("DELETE FROM quarantine_messages WHERE user_id = ?1", params![user_id.0])?;
        conn.execute("DELETE FROM protocol_status WHERE user_id = ?1", params![user_id.0])?;
        drop(conn);
        self.cache.invalidate(user_id);
        Ok(())
    }

    /// Every quarantined message across all users, oldest first. Backs the
    /// unfiltered `GET /quarantine` listing.
    pub fn list_all(&self) -> Result<Vec<QuarantineMessage>> {
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT q_id, user_id, chat_id, text, received_at, expires_at
             FROM quarantine_messages ORDER BY received_at ASC",
        )?;
        let rows = stmt
            .query_map(params![], |row| {
                let user_id = UserId(row.get(1)?);
                Ok(QuarantineMessage {
                    q_id: Uuid::parse_str(&row.get::<_, String>(0)?).unwrap_or_else(|_| Uuid::nil()),
                    user_id,
                    chat_id: ChatId(row.get(2)?),
                    text: row.get(3)?,
                    received_at: chrono::DateTime::parse_from_rfc3339(&row.get::<_, String>(4)?)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    expires_at: chrono::DateTime::parse_from_rfc3339(&row.get::<_, String>(5)?)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Deletes anything past `expires_at`, writing an audit note per row.
    pub fn purge_expired(&self) -> Result<usize> {
        let now = Utc::now().to_rfc3339();
        let conn = self.db.lock().unwrap();

        let expired_users: Vec<i64> = {
            let mut stmt =
                conn.prepare("SELECT user_id FROM quarantine_messages WHERE expires_at <= ?1")?;
            let result = stmt
                .query_map(params![now], |r| r.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            result
        };

        let deleted = conn.execute("DELETE FROM quarantine_messages WHERE expires_at <= ?1", params![now])?;
        for user_id in expired_users {
            audit(&conn, UserId(user_id), "message_expired", None, "system", Utc::now())?;
        }
        Ok(deleted)
    }
}

impl QuarantineGate for QuarantineManager {
    fn is_active(&self, user_id: UserId) -> bool {
        if let Some(active) = self.cache.get(user_id) {
            return active;
        }
        let active = self
            .db
            .lock()
            .unwrap()
            .query_row(
                "SELECT active FROM protocol_status WHERE user_id = ?1",
                params![user_id.0],
                |r| r.get::<_, i64>(0),
            )
            .optional()
            .unwrap_or(None)
            .map(|v| v != 0)
            .unwrap_or(false);
        self.cache.put(user_id, active);
        active
    }
}

fn row_to_status(conn: &Connection, user_id: UserId) -> Result<ProtocolStatus> {
    let row: Option<(i64, Option<String>, Option<String>, Option<String>)> = conn
        .query_row(
            "SELECT active, since, reason, performer FROM protocol_status WHERE user_id = ?1",
            params![user_id.0],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()?;

    match row {
        None => Ok(ProtocolStatus::inactive(user_id)),
        Some((active, since, reason, performer)) => Ok(ProtocolStatus {
            user_id,
            active: active != 0,
            since: since.and_then(|s| {
                chrono::DateTime::parse_from_rfc3339(&s).ok().map(|dt| dt.with_timezone(&Utc))
            }),
            reason,
            performer,
        }),
    }
}

fn row_to_message(user_id: UserId, row: &rusqlite::Row<'_>) -> rusqlite::Result<QuarantineMessage> {
    let q_id: String = row.get(0)?;
    let text: String = row.get(2)?;
    let received_at: String = row.get(3)?;
    let expires_at: String = row.get(4)?;
    Ok(QuarantineMessage {
        q_id: Uuid::parse_str(&q_id).unwrap_or_else(|_| Uuid::nil()),
        user_id,
        chat_id: ChatId(row.get(1)?),
        text,
        received_at: chrono::DateTime::parse_from_rfc3339(&received_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        expires_at: chrono::DateTime::parse_from_rfc3339(&expires_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

fn insert_message(conn: &Connection, q: &QuarantineMessage) -> Result<()> {
    conn.execute(
        "INSERT INTO quarantine_messages (q_id, user_id, chat_id, text, received_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            q.q_id.to_string(),
            q.user_id.0,
            q.chat_id.0,
            q.text,
            q.received_at.to_rfc3339(),
            q.expires_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn audit(
    conn: &Connection,
    user_id: UserId,
    event: &str,
    detail: Option<&str>,
    performer: &str,
    at: chrono::DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO quarantine_audit_log (user_id, event, detail, performer, at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![user_id.0, event, detail, performer, at.to_rfc3339()],
    )?;
    Ok(())
}
