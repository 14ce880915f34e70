//! Per-user adaptive window batching. Several messages sent in quick
//! succession (or while the user is typing) are coalesced into one
//! `PipelineJob` instead of firing the pipeline once per message.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rusqlite::Connection;
use tracing::{debug, warn};

use conduit_core::types::{ChatId, InboundMessage, PipelineJob, UserId};
use conduit_core::QuarantineGate;
use conduit_wal::WalQueue;

use crate::db::init_db;
use crate::error::Result;
use crate::types::BatchingParams;

struct WindowState {
    chat_id: ChatId,
    buffer: Vec<InboundMessage>,
    typing: bool,
    deadline: DateTime<Utc>,
    generation: u64,
}

enum FlushDecision {
    Flush { chat_id: ChatId, buffer: Vec<InboundMessage> },
    Reschedule { generation: u64, deadline: DateTime<Utc> },
}

/// What `ActivityTracker::on_inbound` did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Buffered,
    Quarantined,
}

pub struct ActivityTracker {
    db: Mutex<Connection>,
    wal: Arc<WalQueue>,
    params: BatchingParams,
    windows: DashMap<i64, WindowState>,
    quarantine_gate: Mutex<Option<Arc<dyn QuarantineGate>>>,
}

impl ActivityTracker {
    pub fn new(conn: Connection, wal: Arc<WalQueue>, params: BatchingParams) -> Result<Arc<Self>> {
        init_db(&conn)?;
        Ok(Arc::new(Self {
            db: Mutex::new(conn),
            wal,
            params,
            windows: DashMap::new(),
            quarantine_gate: Mutex::new(None),
        }))
    }

    /// Wires the quarantine manager in after construction, since it is
    /// built from the same database handle this tracker owns and the two
    /// crates don't otherwise depend on each other.
    pub fn set_quarantine_gate(&self, gate: Arc<dyn QuarantineGate>) {
        *self.quarantine_gate.lock().unwrap() = Some(gate);
    }

    fn is_quarantined(&self, user_id: UserId) -> bool {
        self.quarantine_gate
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|g| g.is_active(user_id))
    }

    /// Reloads any still-open windows from the durable store. Buffers
    /// already older than `MAX_WAIT` are flushed immediately; the rest
    /// get a fresh timer for whatever remains of their deadline.
    pub fn recover_on_startup(self: &Arc<Self>) -> Result<usize> {
        let rows: Vec<(i64, i64, String, bool, String, u64)> = {
            let conn = self.db.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT user_id, chat_id, messages, typing, deadline, generation FROM activity_buffers",
            )?;
            let result: Vec<_> = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)? != 0,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)? as u64,
                    ))
                })?
                .filter_map(|r| r.ok())
                .collect();
            result
        };

        let mut recovered = 0;
        let now = Utc::now();
        for (user_id, chat_id, messages_json, typing, deadline_str, generation) in rows {
            let buffer: Vec<InboundMessage> = match serde_json::from_str(&messages_json) {
                Ok(b) => b,
                Err(e) => {
                    warn!(user_id, error = %e, "dropping unreadable recovered buffer");
                    continue;
                }
            };
            let Some(first) = buffer.first() else { continue };
            let max_wait = chrono::Duration::from_std(self.params.max_wait).unwrap();

            if now - first.received_at >= max_wait {
                if let Err(e) = self.flush_now(UserId(user_id), ChatId(chat_id), buffer) {
                    warn!(user_id, error = %e, "recovery flush failed");
                }
                let _ = self.persist_clear(user_id);
                recovered += 1;
                continue;
            }

            let deadline = DateTime::parse_from_rfc3339(&deadline_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or(now);
            self.windows.insert(
                user_id,
                WindowState {
                    chat_id: ChatId(chat_id),
                    buffer,
                    typing,
                    deadline,
                    generation,
                },
            );
            self.spawn_timer(user_id, generation, deadline);
            recovered += 1;
        }
        debug!(recovered, "activity tracker recovered buffers on startup");
        Ok(recovered)
    }

    /// Removes and returns whatever is currently buffered for a user
    /// without flushing it to the WAL. Used when a user is quarantined
    /// mid-window: the caller is expected to hand the drained messages to
    /// the quarantine store instead.
    pub fn drain_buffer(&self, user_id: UserId) -> Option<(ChatId, Vec<InboundMessage>)> {
        let (chat_id, buffer) = {
            let mut w = self.windows.get_mut(&user_id.0)?;
            if w.buffer.is_empty() {
                return None;
            }
            (w.chat_id, std::mem::take(&mut w.buffer))
        };
        self.windows.remove(&user_id.0);
        let _ = self.persist_clear(user_id.0);
        Some((chat_id, buffer))
    }

    /// Records the transport's live typing signal for a user. Affects the
    /// extension applied the next time their window's deadline is
    /// recomputed; does not by itself reschedule a pending timer.
    pub fn set_typing(&self, user_id: UserId, is_typing: bool) {
        if let Some(mut w) = self.windows.get_mut(&user_id.0) {
            w.typing = is_typing;
        }
    }

    /// Appends `msg` to its user's window, flushing immediately if the
    /// window is full or already past `MAX_WAIT`, otherwise (re)arming the
    /// per-user timer. Returns `Quarantined` without touching the buffer if
    /// the user is currently silenced — the caller is responsible for
    /// routing the message into the quarantine store instead.
    pub fn on_inbound(self: &Arc<Self>, msg: InboundMessage) -> Result<IngestOutcome> {
        if self.is_quarantined(msg.user_id) {
            return Ok(IngestOutcome::Quarantined);
        }

        let user_id = msg.user_id;
        let now = Utc::now();
        let max_wait = chrono::Duration::from_std(self.params.max_wait).unwrap();

        let decision = {
            let mut entry = self.windows.entry(user_id.0).or_insert_with(|| WindowState {
                chat_id: msg.chat_id,
                buffer: Vec::new(),
                typing: false,
                deadline: now,
                generation: 0,
            });
            entry.buffer.push(msg);
            let first_received = entry.buffer[0].received_at;
            let over_wait = now - first_received >= max_wait;

            if entry.buffer.len() >= self.params.max_batch || over_wait {
                let buffer = std::mem::take(&mut entry.buffer);
                FlushDecision::Flush { chat_id: entry.chat_id, buffer }
            } else {
                let ext = if entry.typing {
                    self.params.window_typing_ext
                } else {
                    self.params.window_initial
                };
                let mut deadline = now + chrono::Duration::from_std(ext).unwrap();
                let cap = first_received + max_wait;
                if deadline > cap {
                    deadline = cap;
                }
                entry.deadline = deadline;
                entry.generation += 1;
                FlushDecision::Reschedule { generation: entry.generation, deadline }
            }
        };

        self.apply_decision(user_id.0, decision)?;
        Ok(IngestOutcome::Buffered)
    }

    /// Timer callback: flushes if nothing newer has reset the window since
    /// it was armed, otherwise applies the `MIN_BATCH` floor (extend again,
    /// bounded by `MAX_WAIT`) or flushes whatever is buffered.
    fn on_timer_fire(self: &Arc<Self>, user_id: i64, generation: u64) {
        let now = Utc::now();
        let max_wait = chrono::Duration::from_std(self.params.max_wait).unwrap();

        let decision = {
            let Some(mut w) = self.windows.get_mut(&user_id) else {
                return;
            };
            if w.generation != generation {
                return; // superseded by a newer message
            }
            let Some(first) = w.buffer.first() else {
                return;
            };
            let over_wait = now - first.received_at >= max_wait;

            if w.buffer.len() < self.params.min_batch && !over_wait {
                let ext = if w.typing {
                    self.params.window_typing_ext
                } else {
                    self.params.window_initial
                };
                let mut deadline = now + chrono::Duration::from_std(ext).unwrap();
                let cap = first.received_at + max_wait;
                if deadline > cap {
                    deadline = cap;
                }
                w.deadline = deadline;
                w.generation += 1;
                FlushDecision::Reschedule { generation: w.generation, deadline }
            } else {
                let buffer = std::mem::take(&mut w.buffer);
                FlushDecision::Flush { chat_id: w.chat_id, buffer }
            }
        };

        if let Err(e) = self.apply_decision(user_id, decision) {
            warn!(user_id, error = %e, "activity tracker flush/persist failed");
        }
    }

    fn apply_decision(self: &Arc<Self>, user_id: i64, decision: FlushDecision) -> Result<()> {
        match decision {
            FlushDecision::Flush { chat_id, buffer } => {
                self.windows.remove(&user_id);
                self.persist_clear(user_id)?;
                self.flush_now(UserId(user_id), chat_id, buffer)?;
            }
            FlushDecision::Reschedule { generation, deadline } => {
                self.persist_window(user_id)?;
                self.spawn_timer(user_id, generation, deadline);
            }
        }
        Ok(())
    }

    fn flush_now(&self, user_id: UserId, chat_id: ChatId, buffer: Vec<InboundMessage>) -> Result<()> {
        let job = PipelineJob::from_batch(user_id, chat_id, buffer);
        self.wal.enqueue(&job)?;
        debug!(user_id = user_id.0, job_id = %job.job_id, "activity window flushed");
        Ok(())
    }

    fn persist_window(&self, user_id: i64) -> Result<()> {
        let Some(w) = self.windows.get(&user_id) else {
            return Ok(());
        };
        let messages_json = serde_json::to_string(&w.buffer)?;
        let conn = self.db.lock().unwrap();
        conn.execute(
            "INSERT INTO activity_buffers
                (user_id, chat_id, messages, typing, deadline, generation, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(user_id) DO UPDATE SET
                chat_id = excluded.chat_id,
                messages = excluded.messages,
                typing = excluded.typing,
                deadline = excluded.deadline,
                generation = excluded.generation,
                updated_at = excluded.updated_at",
            rusqlite::params![
                user_id,
                w.chat_id.0,
                messages_json,
                w.typing as i64,
                w.deadline.to_rfc3339(),
                w.generation as i64,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn persist_clear(&self, user_id: i64) -> Result<()> {
        let conn = self.db.lock().unwrap();
        conn.execute("DELETE FROM activity_buffers WHERE user_id = ?1", [user_id])?;
        Ok(())
    }

    fn spawn_timer(self: &Arc<Self>, user_id: i64, generation: u64, deadline: DateTime<Utc>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let wait = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(wait).await;
            this.on_timer_fire(user_id, generation);
        });
    }

    #[cfg(test)]
    pub(crate) fn buffered_len(&self, user_id: i64) -> Option<usize> {
        self.windows.get(&user_id).map(|w| w.buffer.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_wal::WalQueue;

    fn msg(user_id: i64, text: &str) -> InboundMessage {
        InboundMessage {
            user_id: UserId(user_id),
            chat_id: ChatId(user_id),
            message_id: 1,
            text: text.to_string(),
            received_at: Utc::now(),
            recovered: None,
        }
    }

    fn tracker(params: BatchingParams) -> (Arc<ActivityTracker>, Arc<WalQueue>) {
        let wal = Arc::new(WalQueue::new(Connection::open_in_memory().unwrap(), 60_000, 3).unwrap());
        let tracker =
            ActivityTracker::new(Connection::open_in_memory().unwrap(), Arc::clone(&wal), params)
                .unwrap();
        (tracker, wal)
    }

    struct AlwaysQuarantined;
    impl QuarantineGate for AlwaysQuarantined {
        fn is_active(&self, _user_id: UserId) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn quarantined_user_never_buffers() {
        let (tracker, wal) = tracker(BatchingParams::default());
        tracker.set_quarantine_gate(Arc::new(AlwaysQuarantined));

        let outcome = tracker.on_inbound(msg(1, "hello")).unwrap();
        assert_eq!(outcome, IngestOutcome::Quarantined);
        assert!(tracker.buffered_len(1).is_none());
        assert_eq!(wal.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn max_batch_triggers_immediate_flush() {
        let params = BatchingParams {
            max_batch: 3,
            min_batch: 1,
            ..Default::default()
        };
        let (tracker, wal) = tracker(params);
        for i in 0..3 {
            tracker.on_inbound(msg(1, &format!("m{i}"))).unwrap();
        }
        assert_eq!(wal.pending_count().unwrap(), 1);
        assert!(tracker.buffered_len(1).is_none());
    }

    #[tokio::test]
    async fn below_min_batch_reschedules_instead_of_flushing() {
        let params = BatchingParams {
            window_initial: Duration::from_millis(15),
            window_typing_ext: Duration::from_millis(15),
            min_batch: 2,
            max_batch: 10,
            max_wait: Duration::from_millis(500),
        };
        let (tracker, wal) = tracker(params);
        tracker.on_inbound(msg(1, "only one")).unwrap();
        assert_eq!(wal.pending_count().unwrap(), 0);

        tokio::time::sleep(Duration::from_millis(60)).await;
        // Single message never reaches MIN_BATCH=2, so it keeps rescheduling
        // rather than flushing, until MAX_WAIT eventually forces it out.
        assert_eq!(wal.pending_count().unwrap(), 0);
        assert_eq!(tracker.buffered_len(1), Some(1));
    }

    #[tokio::test]
    async fn max_wait_forces_flush_even_below_min_batch() {
        let params = BatchingParams {
            window_initial: Duration::from_millis(10),
            window_typing_ext: Duration::from_millis(10),
            min_batch: 5,
            max_batch: 10,
            max_wait: Duration::from_millis(40),
        };
        let (tracker, wal) = tracker(params);
        tracker.on_inbound(msg(1, "only one")).unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(wal.pending_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn recover_on_startup_flushes_stale_buffer() {
        let wal = Arc::new(WalQueue::new(Connection::open_in_memory().unwrap(), 60_000, 3).unwrap());
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();

        let stale_msg = InboundMessage {
            user_id: UserId(7),
            chat_id: ChatId(7),
            message_id: 1,
            text: "stale".to_string(),
            received_at: Utc::now() - chrono::Duration::minutes(5),
            recovered: None,
        };
        conn.execute(
            "INSERT INTO activity_buffers (user_id, chat_id, messages, typing, deadline, generation, updated_at)
             VALUES (7, 7, ?1, 0, ?2, 0, ?2)",
            rusqlite::params![
                serde_json::to_string(&vec![stale_msg]).unwrap(),
                Utc::now().to_rfc3339(),
            ],
        )
        .unwrap();

        let tracker = ActivityTracker::new(conn, Arc::clone(&wal), BatchingParams {
            max_wait: Duration::from_secs(30),
            ..Default::default()
        })
        .unwrap();

        let recovered = tracker.recover_on_startup().unwrap();
        assert_eq!(recovered, 1);
        assert_eq!(wal.pending_count().unwrap(), 1);
    }
}
