//! `conduit-review` — the review store and review queue: persists every
//! drafted interaction awaiting a human decision, enforces the approval
//! state machine, and hands approved messages to the Delivery worker in
//! FIFO order.

pub mod error;
pub mod queue;
pub mod store;

pub use error::{ReviewError, Result};
pub use queue::{ApprovalEdits, ApprovedEntry, ReviewQueue};

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rusqlite::Connection;
    use uuid::Uuid;

    use conduit_core::types::{
        ChatId, LlmCallRecord, Recommendation, ReviewItem, ReviewStatus, SafetyReport, UserId,
    };

    use super::*;

    fn sample_item(user_id: i64) -> ReviewItem {
        let now = Utc::now();
        ReviewItem {
            review_id: Uuid::now_v7(),
            user_id: UserId(user_id),
            chat_id: ChatId(user_id),
            inbound_text: "hey is the gym open sunday".into(),
            last_inbound_message_id: user_id * 100,
            draft_text: "Yep, open 8-6 on Sundays!".into(),
            refined_bubbles: vec!["Yep!".into(), "Open 8-6 on Sundays.".into()],
            final_bubbles: None,
            safety: SafetyReport { risk_score: 0.05, flags: vec![], recommendation: Recommendation::Approve },
            llm1: LlmCallRecord::default(),
            llm2: LlmCallRecord::default(),
            priority_score: 0.5,
            status: ReviewStatus::Pending,
            reviewer_id: None,
            review_started_at: None,
            review_completed_at: None,
            edit_tags: vec![],
            quality_score: None,
            cta: None,
            customer_status: None,
            processing_error: None,
            delivery_failed_reason: None,
            delivered_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn queue() -> ReviewQueue {
        ReviewQueue::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn submit_then_pending_lists_the_item() {
        let q = queue();
        let item = sample_item(1);
        q.submit(&item).unwrap();

        let pending = q.pending(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].review_id, item.review_id);
    }

    #[test]
    fn pending_orders_by_priority_score_descending() {
        let q = queue();
        let mut low = sample_item(1);
        low.priority_score = 0.1;
        let mut high = sample_item(2);
        high.priority_score = 0.9;
        q.submit(&low).unwrap();
        q.submit(&high).unwrap();

        let pending = q.pending(10).unwrap();
        assert_eq!(pending[0].review_id, high.review_id);
        assert_eq!(pending[1].review_id, low.review_id);
    }

    #[test]
    fn full_happy_path_submit_review_approve() {
        let q = queue();
        let item = sample_item(3);
        q.submit(&item).unwrap();

        let reviewing = q.start_reviewing(item.review_id, "alice").unwrap();
        assert_eq!(reviewing.status, ReviewStatus::Reviewing);
        assert_eq!(reviewing.reviewer_id.as_deref(), Some("alice"));

        let approved = q
            .approve(
                item.review_id,
                ApprovalEdits {
                    final_bubbles: vec!["Yep, open 8-6!".into()],
                    edit_tags: vec!["tone_softened".into()],
                    quality_score: Some(5),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(approved.bubbles, vec!["Yep, open 8-6!".to_string()]);

        let stored = q.get(item.review_id).unwrap();
        assert_eq!(stored.status, ReviewStatus::Approved);
        assert_eq!(stored.edit_tags, vec!["tone_softened".to_string()]);

        let next = q.next_approved().unwrap().unwrap();
        assert_eq!(next.review_id, item.review_id);
        assert!(q.next_approved().unwrap().is_none());
    }

    #[test]
    fn start_reviewing_is_idempotent_for_same_reviewer() {
        let q = queue();
        let item = sample_item(4);
        q.submit(&item).unwrap();

        let first = q.start_reviewing(item.review_id, "bob").unwrap();
        let second = q.start_reviewing(item.review_id, "bob").unwrap();
        assert_eq!(first.review_started_at, second.review_started_at);
    }

    #[test]
    fn start_reviewing_by_a_different_reviewer_rejects_the_transition() {
        let q = queue();
        let item = sample_item(5);
        q.submit(&item).unwrap();

        q.start_reviewing(item.review_id, "alice").unwrap();
        let err = q.start_reviewing(item.review_id, "bob").unwrap_err();
        assert!(matches!(err, ReviewError::InvalidTransition { .. }));
    }

    #[test]
    fn approving_a_pending_item_directly_is_rejected() {
        let q = queue();
        let item = sample_item(6);
        q.submit(&item).unwrap();

        let err = q.approve(item.review_id, ApprovalEdits::default()).unwrap_err();
        assert!(matches!(err, ReviewError::InvalidTransition { .. }));
    }

    #[test]
    fn approving_with_an_unknown_edit_tag_is_rejected() {
        let q = queue();
        let item = sample_item(7);
        q.submit(&item).unwrap();
        q.start_reviewing(item.review_id, "alice").unwrap();

        let err = q
            .approve(
                item.review_id,
                ApprovalEdits { edit_tags: vec!["not_a_real_tag".into()], ..Default::default() },
            )
            .unwrap_err();
        assert!(matches!(err, ReviewError::UnknownEditTag(_)));
    }

    #[test]
    fn cancel_releases_the_reviewer_lease_back_to_pending() {
        let q = queue();
        let item = sample_item(8);
        q.submit(&item).unwrap();
        q.start_reviewing(item.review_id, "alice").unwrap();

        let cancelled = q.cancel(item.review_id).unwrap();
        assert_eq!(cancelled.status, ReviewStatus::Pending);
        assert!(cancelled.reviewer_id.is_none());

        let pending = q.pending(10).unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn cancel_on_a_pending_item_is_rejected() {
        let q = queue();
        let item = sample_item(9);
        q.submit(&item).unwrap();

        let err = q.cancel(item.review_id).unwrap_err();
        assert!(matches!(err, ReviewError::InvalidTransition { .. }));
    }

    #[test]
    fn reject_records_a_reason_and_terminates_the_item() {
        let q = queue();
        let item = sample_item(10);
        q.submit(&item).unwrap();
        q.start_reviewing(item.review_id, "alice").unwrap();

        let rejected = q.reject(item.review_id, Some("off_topic")).unwrap();
        assert_eq!(rejected.status, ReviewStatus::Rejected);
        assert_eq!(rejected.processing_error.as_deref(), Some("off_topic"));
    }

    #[test]
    fn approved_queue_is_fifo_across_multiple_approvals() {
        let q = queue();
        let a = sample_item(11);
        let b = sample_item(12);
        q.submit(&a).unwrap();
        q.submit(&b).unwrap();
        q.start_reviewing(a.review_id, "alice").unwrap();
        q.start_reviewing(b.review_id, "alice").unwrap();
        q.approve(a.review_id, ApprovalEdits { final_bubbles: vec!["a".into()], ..Default::default() }).unwrap();
        q.approve(b.review_id, ApprovalEdits { final_bubbles: vec!["b".into()], ..Default::default() }).unwrap();

        assert_eq!(q.approved_queue_len().unwrap(), 2);
        assert_eq!(q.next_approved().unwrap().unwrap().review_id, a.review_id);
        assert_eq!(q.next_approved().unwrap().unwrap().review_id, b.review_id);
    }

    #[test]
    fn anonymize_user_scrubs_identity_but_keeps_the_row() {
        let q = queue();
        let item = sample_item(13);
        q.submit(&item).unwrap();

        let n = q.anonymize_user(UserId(13), UserId(-1)).unwrap();
        assert_eq!(n, 1);

        let stored = q.get(item.review_id).unwrap();
        assert_eq!(stored.user_id, UserId(-1));
    }
}
