//! Drains the approved sub-queue and sends each item with human-cadence
//! pacing, preserving delivery order per user.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use rusqlite::Connection;
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, warn};

use conduit_entities::EntityCache;
use conduit_memory::MemoryStore;
use conduit_recovery::db as cursor_db;
use conduit_review::{ApprovedEntry, ReviewQueue};
use conduit_transport::{retry_with_backoff, Transport, TransportError};

use crate::cadence::{inter_bubble_pause, read_delay, typing_time};
use crate::error::Result;
use crate::slot::DeliverySlots;

pub struct DeliveryWorker {
    transport: Arc<dyn Transport>,
    entities: Arc<EntityCache>,
    memory: Arc<MemoryStore>,
    review: Arc<ReviewQueue>,
    cursor_conn: Mutex<Connection>,
    slots: DeliverySlots,
    permits: Semaphore,
    idle_poll: Duration,
    resolve_attempts: u32,
    send_attempts: u32,
}

impl DeliveryWorker {
    pub fn new(
        transport: Arc<dyn Transport>,
        entities: Arc<EntityCache>,
        memory: Arc<MemoryStore>,
        review: Arc<ReviewQueue>,
        cursor_conn: Connection,
        pool_size: usize,
    ) -> Result<Arc<Self>> {
        cursor_db::init_db(&cursor_conn)?;
        Ok(Arc::new(Self {
            transport,
            entities,
            memory,
            review,
            cursor_conn: Mutex::new(cursor_conn),
            slots: DeliverySlots::new(),
            permits: Semaphore::new(pool_size.max(1)),
            idle_poll: Duration::from_millis(300),
            resolve_attempts: 3,
            send_attempts: 5,
        }))
    }

    /// Pops approved items and spawns one delivery task per item, each
    /// gated by a shared pool-size semaphore so at most `pool_size`
    /// deliveries (across all users) are in flight at once.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("delivery worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.review.next_approved() {
                Ok(Some(entry)) => {
                    let this = Arc::clone(&self);
                    tokio::spawn(async move {
                        let _permit = this.permits.acquire().await.expect("semaphore is never closed");
                        this.deliver(entry).await;
                    });
                }
                Ok(None) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.idle_poll) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(e) => {
                    error!(err = %e, "failed to pop approved queue");
                    tokio::time::sleep(self.idle_poll).await;
                }
            }
        }
        info!("delivery worker shutting down");
    }

    async fn deliver(&self, entry: ApprovedEntry) {
        let slot = self.slots.slot_for(entry.user_id.0);
        let _guard = slot.lock().await;

        let resolved = retry_with_backoff(
            self.resolve_attempts,
            |e: &conduit_entities::EntityError| {
                let conduit_entities::EntityError::Transport(te) = e;
                te.is_permanent()
            },
            || self.entities.get_or_resolve(self.transport.as_ref(), entry.user_id),
        )
        .await;
        let has_typing = resolved.is_ok();
        if let Err(e) = &resolved {
            warn!(review_id = %entry.review_id, err = %e, "entity resolution failed, sending without a typing indicator");
        }

        tokio::time::sleep(read_delay(&entry.inbound_text)).await;

        for (i, bubble) in entry.bubbles.iter().enumerate() {
            if has_typing {
                let _ = self.transport.set_typing(entry.chat_id, true).await;
            }
            tokio::time::sleep(typing_time(bubble)).await;
            if has_typing {
                let _ = self.transport.set_typing(entry.chat_id, false).await;
            }

            let sent = retry_with_backoff(
                self.send_attempts,
                |e: &TransportError| e.is_permanent(),
                || self.transport.send(entry.chat_id, bubble),
            )
            .await;

            if let Err(e) = sent {
                warn!(review_id = %entry.review_id, err = %e, "send failed permanently, dropping remaining bubbles");
                if let Err(e2) = self.review.mark_delivery_failed(entry.review_id, &e.to_string()) {
                    error!(review_id = %entry.review_id, err = %e2, "failed to record delivery failure");
                }
                return;
            }

            if i + 1 < entry.bubbles.len() {
                tokio::time::sleep(inter_bubble_pause()).await;
            }
        }

        self.finalize_success(&entry);
    }

    fn finalize_success(&self, entry: &ApprovedEntry) {
        if let Err(e) = self.memory.save_turn(entry.user_id.0, "assistant", &entry.bubbles.join(" ")) {
            warn!(review_id = %entry.review_id, err = %e, "failed to record assistant turn after delivery");
        }

        let conn = self.cursor_conn.lock().unwrap();
        if let Err(e) = cursor_db::upsert_cursor(
            &conn,
            entry.user_id,
            entry.chat_id,
            entry.last_inbound_message_id,
            Utc::now(),
        ) {
            warn!(review_id = %entry.review_id, err = %e, "failed to advance message cursor");
        }
        drop(conn);

        if let Err(e) = self.review.mark_delivered(entry.review_id) {
            error!(review_id = %entry.review_id, err = %e, "failed to stamp delivered_at");
        }
    }

    #[cfg(test)]
    pub(crate) fn cursor_for_test(
        &self,
        user_id: conduit_core::types::UserId,
    ) -> Option<conduit_core::types::MessageCursor> {
        let conn = self.cursor_conn.lock().unwrap();
        cursor_db::get_cursor(&conn, user_id).ok().flatten()
    }

    #[cfg(test)]
    pub(crate) async fn deliver_for_test(&self, entry: ApprovedEntry) {
        self.deliver(entry).await;
    }

    #[cfg(test)]
    pub(crate) fn review_for_test(&self) -> Arc<ReviewQueue> {
        Arc::clone(&self.review)
    }
}
