//! `conduit-delivery` — the approved-message delivery worker. Drains the
//! review queue's approved sub-queue, waits out a human-like reading and
//! typing cadence, sends each bubble through the transport, and folds the
//! result back into memory and the cursor table once the send succeeds.

pub mod cadence;
pub mod error;
pub mod slot;
pub mod worker;

pub use error::{DeliveryError, Result};
pub use worker::DeliveryWorker;

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use rusqlite::Connection;

    use conduit_core::types::{ChatId, UserId};
    use conduit_entities::EntityCache;
    use conduit_memory::MemoryStore;
    use conduit_review::{ApprovalEdits, ReviewQueue};
    use conduit_transport::{EntityHandle, HistoryMessage, Transport, TransportError, TransportStatus};

    use super::*;

    struct FakeTransport {
        sends: AtomicUsize,
        fail_send_after: Option<usize>,
        permanent: bool,
    }

    impl FakeTransport {
        fn reliable() -> Self {
            Self { sends: AtomicUsize::new(0), fail_send_after: None, permanent: false }
        }

        fn failing_on_bubble(n: usize, permanent: bool) -> Self {
            Self { sends: AtomicUsize::new(0), fail_send_after: Some(n), permanent }
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        fn name(&self) -> &str {
            "fake"
        }
        async fn connect(&self) -> std::result::Result<(), TransportError> {
            Ok(())
        }
        async fn disconnect(&self) -> std::result::Result<(), TransportError> {
            Ok(())
        }
        fn status(&self) -> TransportStatus {
            TransportStatus::Connected
        }
        async fn send(&self, _chat_id: ChatId, _text: &str) -> std::result::Result<(), TransportError> {
            let n = self.sends.fetch_add(1, Ordering::SeqCst);
            if self.fail_send_after == Some(n) {
                return Err(TransportError::SendFailed { reason: "boom".into(), permanent: self.permanent });
            }
            Ok(())
        }
        async fn set_typing(&self, _chat_id: ChatId, _is_typing: bool) -> std::result::Result<(), TransportError> {
            Ok(())
        }
        async fn scan_history(
            &self,
            _chat_id: ChatId,
            _since_message_id: i64,
            _limit: usize,
        ) -> std::result::Result<Vec<HistoryMessage>, TransportError> {
            Ok(Vec::new())
        }
        async fn resolve_entity(&self, user_id: UserId) -> std::result::Result<EntityHandle, TransportError> {
            Ok(EntityHandle(serde_json::json!({ "user_id": user_id.0 })))
        }
    }

    fn build_worker(transport: Arc<dyn Transport>) -> Arc<DeliveryWorker> {
        let memory = Arc::new(
            MemoryStore::new(Connection::open_in_memory().unwrap(), 50, 10, 7, 30, 20).unwrap(),
        );
        let review = Arc::new(ReviewQueue::new(Connection::open_in_memory().unwrap()).unwrap());
        let entities = Arc::new(EntityCache::new());
        DeliveryWorker::new(transport, entities, memory, review, Connection::open_in_memory().unwrap(), 4)
            .unwrap()
    }

    fn submit_and_approve(review: &ReviewQueue, user_id: i64, bubbles: Vec<String>) -> uuid::Uuid {
        let now = chrono::Utc::now();
        let item = conduit_core::types::ReviewItem {
            review_id: uuid::Uuid::now_v7(),
            user_id: UserId(user_id),
            chat_id: ChatId(user_id),
            inbound_text: "hi there".into(),
            last_inbound_message_id: 7,
            draft_text: "draft".into(),
            refined_bubbles: bubbles.clone(),
            final_bubbles: None,
            safety: conduit_core::types::SafetyReport {
                risk_score: 0.0,
                flags: vec![],
                recommendation: conduit_core::types::Recommendation::Approve,
            },
            llm1: conduit_core::types::LlmCallRecord::default(),
            llm2: conduit_core::types::LlmCallRecord::default(),
            priority_score: 0.1,
            status: conduit_core::types::ReviewStatus::Pending,
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
        };
        review.submit(&item).unwrap();
        review.start_reviewing(item.review_id, "alice").unwrap();
        review
            .approve(item.review_id, ApprovalEdits { final_bubbles: bubbles, ..Default::default() })
            .unwrap();
        item.review_id
    }

    #[tokio::test]
    async fn successful_delivery_updates_memory_cursor_and_delivered_at() {
        let transport: Arc<dyn Transport> = Arc::new(FakeTransport::reliable());
        let worker = build_worker(transport);
        let review = Arc::clone(&worker_review(&worker));
        let review_id = submit_and_approve(&review, 1, vec!["hey!".into(), "how's it going".into()]);

        let entry = review.next_approved().unwrap().unwrap();
        assert_eq!(entry.review_id, review_id);
        worker.deliver_for_test(entry).await;

        let item = review.get(review_id).unwrap();
        assert!(item.delivered_at.is_some());
        assert!(item.delivery_failed_reason.is_none());

        let cursor = worker.cursor_for_test(UserId(1)).unwrap();
        assert_eq!(cursor.last_processed_transport_message_id, 7);
    }

    #[tokio::test]
    async fn permanent_send_failure_marks_delivery_failed_and_skips_remaining_bubbles() {
        let transport: Arc<dyn Transport> = Arc::new(FakeTransport::failing_on_bubble(0, true));
        let worker = build_worker(transport);
        let review = Arc::clone(&worker_review(&worker));
        let review_id = submit_and_approve(&review, 2, vec!["one".into(), "two".into()]);

        let entry = review.next_approved().unwrap().unwrap();
        worker.deliver_for_test(entry).await;

        let item = review.get(review_id).unwrap();
        assert!(item.delivered_at.is_none());
        assert!(item.delivery_failed_reason.is_some());
        assert!(worker.cursor_for_test(UserId(2)).is_none());
    }

    #[tokio::test]
    async fn cadence_delays_are_applied_before_each_send() {
        let transport: Arc<dyn Transport> = Arc::new(FakeTransport::reliable());
        let worker = build_worker(transport);
        let review = Arc::clone(&worker_review(&worker));
        submit_and_approve(&review, 3, vec!["hi".into()]);

        let entry = review.next_approved().unwrap().unwrap();
        let started = std::time::Instant::now();
        worker.deliver_for_test(entry).await;
        // read_delay floor 0.5s + typing_time floor 0.8s, no inter-bubble pause for a single bubble
        assert!(started.elapsed() >= Duration::from_millis(1250));
    }

    fn worker_review(worker: &Arc<DeliveryWorker>) -> Arc<ReviewQueue> {
        worker.review_for_test()
    }
}
