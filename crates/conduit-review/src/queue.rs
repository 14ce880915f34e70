//! Review queue: orchestrates state transitions over the interactions
//! store and the durable approved sub-queue the Delivery worker drains.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use conduit_core::types::{
    ChatId, CtaMetadata, CustomerStatus, ReviewItem, ReviewStatus, UserId,
};

use crate::error::{ReviewError, Result};
use crate::store;

/// An item handed to the Delivery worker once a reviewer approves it.
#[derive(Debug, Clone)]
pub struct ApprovedEntry {
    pub review_id: Uuid,
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub bubbles: Vec<String>,
    pub inbound_text: String,
    pub last_inbound_message_id: i64,
    pub approved_at: DateTime<Utc>,
}

/// Fields a reviewer submits when approving a ReviewItem.
#[derive(Debug, Default, Clone)]
pub struct ApprovalEdits {
    pub final_bubbles: Vec<String>,
    pub edit_tags: Vec<String>,
    pub quality_score: Option<u8>,
    pub cta: Option<CtaMetadata>,
    pub customer_status: Option<CustomerStatus>,
    pub reviewer_notes: Option<String>,
}

pub struct ReviewQueue {
    conn: Mutex<Connection>,
}

impl ReviewQueue {
    pub fn new(conn: Connection) -> Result<Self> {
        store::init_db(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Persists a freshly built ReviewItem, as produced by the pipeline's
    /// safety/refine stages. Always starts life as `pending`.
    pub fn submit(&self, item: &ReviewItem) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        store::create(&conn, item)
    }

    /// Highest-`priority_score`-first, capped at `limit`. The ordering is
    /// carried by the store's index rather than an in-memory heap, so a
    /// priority changed by a later edit is picked up on the very next call.
    pub fn pending(&self, limit: usize) -> Result<Vec<ReviewItem>> {
        let conn = self.conn.lock().unwrap();
        let mut items = store::list_by_status(&conn, ReviewStatus::Pending)?;
        items.truncate(limit);
        Ok(items)
    }

    pub fn get(&self, review_id: Uuid) -> Result<ReviewItem> {
        let conn = self.conn.lock().unwrap();
        store::get(&conn, review_id)?.ok_or(ReviewError::NotFound(review_id))
    }

    fn require_transition(item: &ReviewItem, next: ReviewStatus) -> Result<()> {
        if !item.status.can_transition_to(next) {
            return Err(ReviewError::InvalidTransition {
                id: item.review_id,
                from: item.status.to_string(),
                to: next.to_string(),
            });
        }
        Ok(())
    }

    /// `pending -> reviewing`. Idempotent when the same reviewer repeats the
    /// call on an item it already owns, so a retried HTTP request never
    /// trips the transition guard.
    pub fn start_reviewing(&self, review_id: Uuid, reviewer_id: &str) -> Result<ReviewItem> {
        let conn = self.conn.lock().unwrap();
        let mut item = store::get(&conn, review_id)?.ok_or(ReviewError::NotFound(review_id))?;

        if item.status == ReviewStatus::Reviewing && item.reviewer_id.as_deref() == Some(reviewer_id) {
            return Ok(item);
        }

        Self::require_transition(&item, ReviewStatus::Reviewing)?;
        item.status = ReviewStatus::Reviewing;
        item.reviewer_id = Some(reviewer_id.to_string());
        item.review_started_at = Some(Utc::now());
        item.updated_at = Utc::now();
        store::update(&conn, &item)?;
        Ok(item)
    }

    /// Releases the reviewer lease and returns the item to `pending`. This
    /// is a distinct action from the `cancelled` terminal status: a
    /// reviewer backing out just frees the item for someone else to pick up.
    pub fn cancel(&self, review_id: Uuid) -> Result<ReviewItem> {
        let conn = self.conn.lock().unwrap();
        let mut item = store::get(&conn, review_id)?.ok_or(ReviewError::NotFound(review_id))?;

        if item.status != ReviewStatus::Reviewing {
            return Err(ReviewError::InvalidTransition {
                id: item.review_id,
                from: item.status.to_string(),
                to: ReviewStatus::Pending.to_string(),
            });
        }

        item.status = ReviewStatus::Pending;
        item.reviewer_id = None;
        item.review_started_at = None;
        item.updated_at = Utc::now();
        store::update(&conn, &item)?;
        Ok(item)
    }

    pub fn reject(&self, review_id: Uuid, reason: Option<&str>) -> Result<ReviewItem> {
        let conn = self.conn.lock().unwrap();
        let mut item = store::get(&conn, review_id)?.ok_or(ReviewError::NotFound(review_id))?;
        Self::require_transition(&item, ReviewStatus::Rejected)?;

        item.status = ReviewStatus::Rejected;
        item.processing_error = reason.map(str::to_string);
        item.review_completed_at = Some(Utc::now());
        item.updated_at = Utc::now();
        store::update(&conn, &item)?;
        Ok(item)
    }

    /// Transitions to `approved`, persists the reviewer's edits, and pushes
    /// the finished message onto the durable approved sub-queue.
    pub fn approve(&self, review_id: Uuid, edits: ApprovalEdits) -> Result<ApprovedEntry> {
        for tag in &edits.edit_tags {
            if !conduit_core::types::is_known_edit_tag(tag) {
                return Err(ReviewError::UnknownEditTag(tag.clone()));
            }
        }

        let conn = self.conn.lock().unwrap();
        let mut item = store::get(&conn, review_id)?.ok_or(ReviewError::NotFound(review_id))?;
        Self::require_transition(&item, ReviewStatus::Approved)?;

        let now = Utc::now();
        item.status = ReviewStatus::Approved;
        item.final_bubbles = Some(edits.final_bubbles.clone());
        item.edit_tags = edits.edit_tags;
        item.quality_score = edits.quality_score;
        item.cta = edits.cta;
        if edits.customer_status.is_some() {
            item.customer_status = edits.customer_status;
        }
        item.review_completed_at = Some(now);
        item.updated_at = now;
        store::update(&conn, &item)?;

        store::push_approved(
            &conn,
            item.review_id,
            item.user_id,
            item.chat_id,
            &edits.final_bubbles,
            &item.inbound_text,
            item.last_inbound_message_id,
            now,
        )?;

        Ok(ApprovedEntry {
            review_id: item.review_id,
            user_id: item.user_id,
            chat_id: item.chat_id,
            bubbles: edits.final_bubbles,
            inbound_text: item.inbound_text,
            last_inbound_message_id: item.last_inbound_message_id,
            approved_at: now,
        })
    }

    /// Pops the oldest approved item for the Delivery worker. FIFO by
    /// insertion order, independent of `priority_score`: once approved, a
    /// message's delivery order is purely queueing fairness.
    pub fn next_approved(&self) -> Result<Option<ApprovedEntry>> {
        let conn = self.conn.lock().unwrap();
        let row = store::pop_approved(&conn)?;
        Ok(row.map(|r| ApprovedEntry {
            review_id: r.review_id,
            user_id: r.user_id,
            chat_id: r.chat_id,
            bubbles: r.bubbles,
            inbound_text: r.inbound_text,
            last_inbound_message_id: r.last_inbound_message_id,
            approved_at: r.approved_at,
        }))
    }

    /// Stamps a successfully delivered item. Delivery is tracked on these
    /// two fields rather than as a further `status` transition: the item's
    /// lifecycle as far as review is concerned ended at `approved`.
    pub fn mark_delivered(&self, review_id: Uuid) -> Result<ReviewItem> {
        let conn = self.conn.lock().unwrap();
        let mut item = store::get(&conn, review_id)?.ok_or(ReviewError::NotFound(review_id))?;
        let now = Utc::now();
        item.delivered_at = Some(now);
        item.updated_at = now;
        store::update(&conn, &item)?;
        Ok(item)
    }

    pub fn mark_delivery_failed(&self, review_id: Uuid, reason: &str) -> Result<ReviewItem> {
        let conn = self.conn.lock().unwrap();
        let mut item = store::get(&conn, review_id)?.ok_or(ReviewError::NotFound(review_id))?;
        item.delivery_failed_reason = Some(reason.to_string());
        item.updated_at = Utc::now();
        store::update(&conn, &item)?;
        Ok(item)
    }

    pub fn approved_queue_len(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        store::approved_queue_len(&conn)
    }

    /// GDPR erasure support: replaces every interaction's `user_id` with a
    /// tombstone, keeping rows for analytics while scrubbing identity.
    pub fn anonymize_user(&self, user_id: UserId, tombstone: UserId) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        store::anonymize_user(&conn, user_id, tombstone)
    }
}
