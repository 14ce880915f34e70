//! Recovery sweep: replays history the transport missed while disconnected
//! or while a user's activation never produced a cursor update.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, warn};
use uuid::Uuid;

use conduit_activity::ActivityTracker;
use conduit_core::types::{ChatId, InboundMessage, RecoveryOperation, RecoveryStatus, RecoveryTier, UserId};
use conduit_core::QuarantineGate;
use conduit_transport::{HistoryMessage, Transport};

use crate::db::{finish_operation, get_cursor, init_db, insert_operation, list_cursors, upsert_cursor};
use crate::error::Result;

#[derive(Debug, Clone, Copy)]
pub struct RecoveryParams {
    pub sweep_interval: Duration,
    pub active_window: Duration,
    pub max_per_user: usize,
    pub max_concurrent_users: usize,
    pub transport_rate_limit: u32,
    pub consecutive_error_threshold: u32,
}

impl Default for RecoveryParams {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(30 * 60),
            active_window: Duration::from_secs(24 * 3600),
            max_per_user: 50,
            max_concurrent_users: 4,
            transport_rate_limit: 30,
            consecutive_error_threshold: 3,
        }
    }
}

fn classify(age: chrono::Duration) -> RecoveryTier {
    if age < chrono::Duration::hours(2) {
        RecoveryTier::Tier1
    } else if age < chrono::Duration::hours(12) {
        RecoveryTier::Tier2
    } else {
        RecoveryTier::Tier3
    }
}

/// Sweeps every known `MessageCursor`, replaying missed history into the
/// Activity Tracker. Owns its own database handle for cursors and sweep
/// audit rows; the tracker and transport are shared with the rest of the
/// pipeline.
pub struct RecoveryAgent {
    db: Mutex<Connection>,
    transport: Arc<dyn Transport>,
    tracker: Arc<ActivityTracker>,
    quarantine: Arc<dyn QuarantineGate>,
    params: RecoveryParams,
}

impl RecoveryAgent {
    pub fn new(
        conn: Connection,
        transport: Arc<dyn Transport>,
        tracker: Arc<ActivityTracker>,
        quarantine: Arc<dyn QuarantineGate>,
        params: RecoveryParams,
    ) -> Result<Arc<Self>> {
        init_db(&conn)?;
        Ok(Arc::new(Self {
            db: Mutex::new(conn),
            transport,
            tracker,
            quarantine,
            params,
        }))
    }

    /// Runs sweeps on startup and then every `sweep_interval` until
    /// `shutdown` broadcasts `true`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("recovery agent started");
        if let Err(e) = self.sweep().await {
            error!("initial recovery sweep failed: {e}");
        }

        let mut interval = tokio::time::interval(self.params.sweep_interval);
        interval.tick().await; // first tick fires immediately, already swept above

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!("recovery sweep failed: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("recovery agent shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One full pass over every known cursor. Returns the persisted
    /// `RecoveryOperation` whether the sweep completed or halted early.
    pub async fn sweep(&self) -> Result<RecoveryOperation> {
        let op_id = Uuid::now_v7();
        let started_at = Utc::now();
        {
            let conn = self.db.lock().unwrap();
            insert_operation(&conn, op_id, started_at)?;
        }

        let cursors = {
            let conn = self.db.lock().unwrap();
            list_cursors(&conn)?
        };

        let concurrency = Arc::new(Semaphore::new(self.params.max_concurrent_users.max(1)));
        let rate = Arc::new(Semaphore::new(self.params.transport_rate_limit.max(1) as usize));
        let users_scanned = Arc::new(AtomicU32::new(0));
        let messages_recovered = Arc::new(AtomicU32::new(0));
        let errors = Arc::new(AtomicU32::new(0));
        let consecutive_errors = Arc::new(AtomicU32::new(0));
        let halted = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let mut handles = Vec::with_capacity(cursors.len());
        for row in cursors {
            if halted.load(Ordering::SeqCst) {
                break;
            }
            if self.quarantine.is_active(row.cursor.user_id) {
                continue;
            }

            let permit = concurrency.clone().acquire_owned().await.unwrap();
            let transport = self.transport.clone();
            let tracker = self.tracker.clone();
            let rate = rate.clone();
            let max_per_user = self.params.max_per_user;
            let active_window = self.params.active_window;
            let threshold = self.params.consecutive_error_threshold;
            let users_scanned = users_scanned.clone();
            let messages_recovered = messages_recovered.clone();
            let errors = errors.clone();
            let consecutive_errors = consecutive_errors.clone();
            let halted = halted.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                users_scanned.fetch_add(1, Ordering::SeqCst);

                let outcome = recover_user(
                    transport.as_ref(),
                    &tracker,
                    rate.as_ref(),
                    row.chat_id,
                    row.cursor.user_id,
                    row.cursor.last_processed_transport_message_id,
                    max_per_user,
                    active_window,
                )
                .await;

                match outcome {
                    Ok(recovered) => {
                        consecutive_errors.store(0, Ordering::SeqCst);
                        messages_recovered.fetch_add(recovered as u32, Ordering::SeqCst);
                    }
                    Err(e) => {
                        warn!(user_id = row.cursor.user_id.0, "recovery failed for user: {e}");
                        errors.fetch_add(1, Ordering::SeqCst);
                        if consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1 >= threshold {
                            halted.store(true, Ordering::SeqCst);
                        }
                    }
                }
            }));
        }

        for h in handles {
            let _ = h.await;
        }

        let finished_at = Utc::now();
        let status = if halted.load(Ordering::SeqCst) {
            RecoveryStatus::Halted
        } else {
            RecoveryStatus::Completed
        };
        let op = RecoveryOperation {
            op_id,
            started_at,
            finished_at: Some(finished_at),
            users_scanned: users_scanned.load(Ordering::SeqCst) as u64,
            messages_recovered: messages_recovered.load(Ordering::SeqCst) as u64,
            errors: errors.load(Ordering::SeqCst) as u64,
            status,
        };

        {
            let conn = self.db.lock().unwrap();
            finish_operation(&conn, &op)?;
        }

        if matches!(status, RecoveryStatus::Halted) {
            warn!(op_id = %op_id, "recovery sweep halted: consecutive error threshold reached");
        } else {
            info!(
                op_id = %op_id,
                users_scanned = op.users_scanned,
                messages_recovered = op.messages_recovered,
                "recovery sweep completed"
            );
        }

        Ok(op)
    }

    pub fn record_cursor(
        &self,
        user_id: UserId,
        chat_id: ChatId,
        last_processed_transport_message_id: i64,
        last_processed_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.db.lock().unwrap();
        upsert_cursor(&conn, user_id, chat_id, last_processed_transport_message_id, last_processed_at)
    }

    pub fn cursor(&self, user_id: UserId) -> Result<Option<conduit_core::types::MessageCursor>> {
        let conn = self.db.lock().unwrap();
        get_cursor(&conn, user_id)
    }
}

/// Scans, classifies, and replays one user's missed history. Tier 3
/// messages (older than 12h) are only injected if the same scan shows
/// the user active within `active_window` (default 24h) — otherwise
/// there is no evidence the user still cares about the conversation.
async fn recover_user(
    transport: &dyn Transport,
    tracker: &Arc<ActivityTracker>,
    rate: &Semaphore,
    chat_id: ChatId,
    user_id: UserId,
    since_message_id: i64,
    limit: usize,
    active_window: Duration,
) -> Result<usize> {
    let _rate_permit = rate.acquire().await.unwrap();
    let history: Vec<HistoryMessage> = transport.scan_history(chat_id, since_message_id, limit).await?;
    if history.is_empty() {
        return Ok(0);
    }

    let now = Utc::now();
    let active_window = chrono::Duration::from_std(active_window).unwrap_or(chrono::Duration::hours(24));
    let active_recently = history
        .iter()
        .any(|m| now.signed_duration_since(m.received_at) < active_window);

    let mut recovered = 0usize;
    for item in history {
        let age = now.signed_duration_since(item.received_at);
        let tier = classify(age);
        if matches!(tier, RecoveryTier::Tier3) && !active_recently {
            continue;
        }

        let msg = InboundMessage {
            user_id,
            chat_id,
            message_id: item.message_id,
            text: item.text,
            received_at: item.received_at,
            recovered: Some(tier),
        };
        tracker.on_inbound(msg).ok();
        recovered += 1;
    }

    Ok(recovered)
}
