//! `conduit-supervisor` — the pipeline orchestrator.
//!
//! Takes one reserved `PipelineJob` off the WAL, diverts it if the sender
//! is quarantined, drafts a reply in two LLM stages, scores it for safety,
//! and emits a `ReviewItem` for a human reviewer to act on. A crash
//! mid-job never loses work: the WAL lease is only acked on a terminal
//! outcome (diverted or submitted), so an interrupted worker's job is
//! reservable by another worker once the lease expires.

pub mod error;
pub mod lock;
pub mod pipeline;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use conduit_wal::{QueuedJob, WalQueue};

pub use error::{Result, SupervisorError};
pub use pipeline::{Outcome, Supervisor};

/// Drains the WAL and hands each reserved job to a `Supervisor`.
pub struct Worker {
    supervisor: Arc<Supervisor>,
    wal: Arc<WalQueue>,
    worker_id: String,
    lease_ms: u64,
    idle_poll: Duration,
}

impl Worker {
    pub fn new(supervisor: Arc<Supervisor>, wal: Arc<WalQueue>, worker_id: impl Into<String>) -> Self {
        Self {
            supervisor,
            wal,
            worker_id: worker_id.into(),
            lease_ms: conduit_wal::DEFAULT_LEASE.as_millis() as u64,
            idle_poll: Duration::from_millis(500),
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id = %self.worker_id, "supervisor worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.wal.reserve(&self.worker_id, Some(self.lease_ms)) {
                Ok(Some(queued)) => self.handle(queued).await,
                Ok(None) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.idle_poll) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(e) => {
                    error!(worker_id = %self.worker_id, err = %e, "reserve failed");
                    tokio::time::sleep(self.idle_poll).await;
                }
            }
        }
        info!(worker_id = %self.worker_id, "supervisor worker shutting down");
    }

    async fn handle(&self, queued: QueuedJob) {
        let job_id = queued.job.job_id.to_string();
        let outcome = self.supervisor.process_job(&queued.job).await;
        match outcome {
            Ok(Outcome::Diverted) | Ok(Outcome::Submitted { .. }) => {
                if let Err(e) = self.wal.ack(&job_id, &self.worker_id) {
                    error!(%job_id, err = %e, "failed to ack processed job");
                }
            }
            Ok(Outcome::Busy) => {
                if let Err(e) = self.wal.nack(&job_id, &self.worker_id) {
                    error!(%job_id, err = %e, "failed to nack busy job");
                }
            }
            Err(e) => {
                error!(%job_id, err = %e, "pipeline infrastructure failure, nacking for retry");
                if let Err(e) = self.wal.nack(&job_id, &self.worker_id) {
                    error!(%job_id, err = %e, "failed to nack failed job");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use rusqlite::Connection;

    use conduit_core::clock::Clock;
    use conduit_core::config::{ModelProfile, SupervisorConfig};
    use conduit_core::types::{ChatId, InboundMessage, PipelineJob, ReviewStatus, UserId};
    use conduit_llm::{ChatRequest, ChatResponse, LlmError, LlmProvider, QuotaTracker};
    use conduit_memory::MemoryStore;
    use conduit_quarantine::QuarantineManager;
    use conduit_review::ReviewQueue;
    use conduit_safety::SafetyAnalyzer;
    use conduit_users::db::init_db as init_users_db;

    use super::*;

    struct EchoProvider {
        name: &'static str,
        reply: String,
    }

    #[async_trait]
    impl LlmProvider for EchoProvider {
        fn name(&self) -> &str {
            self.name
        }
        async fn send(&self, req: &ChatRequest) -> std::result::Result<ChatResponse, LlmError> {
            Ok(ChatResponse {
                content: self.reply.clone(),
                model: req.model.clone(),
                tokens_in: 100,
                tokens_out: 40,
                cached_tokens: 10,
                stop_reason: "stop".to_string(),
            })
        }
    }

    struct FailingProvider {
        name: &'static str,
    }

    #[async_trait]
    impl LlmProvider for FailingProvider {
        fn name(&self) -> &str {
            self.name
        }
        async fn send(&self, _req: &ChatRequest) -> std::result::Result<ChatResponse, LlmError> {
            Err(LlmError::Unavailable("simulated outage".to_string()))
        }
    }

    fn profile(model: &str) -> ModelProfile {
        ModelProfile {
            provider: "anthropic".to_string(),
            model: model.to_string(),
            temperature: 0.5,
            max_tokens: 512,
            price_in: 0.000001,
            price_out: 0.000002,
            price_cached_in: 0.0000001,
        }
    }

    fn build_supervisor(stage1: Arc<dyn LlmProvider>, stage2: Arc<dyn LlmProvider>) -> Supervisor {
        let memory = Arc::new(
            MemoryStore::new(Connection::open_in_memory().unwrap(), 50, 10, 7, 30, 20).unwrap(),
        );
        let safety = Arc::new(SafetyAnalyzer::new().unwrap());
        let quarantine = QuarantineManager::new(
            Connection::open_in_memory().unwrap(),
            Duration::from_secs(300),
            Duration::from_secs(7 * 24 * 3600),
        )
        .unwrap();
        let review = Arc::new(ReviewQueue::new(Connection::open_in_memory().unwrap()).unwrap());
        let users_conn = Connection::open_in_memory().unwrap();
        init_users_db(&users_conn).unwrap();

        let constitution = "You are a warm, concise assistant. ".repeat(200);
        let traits = "friendly, concise, never pushy";
        let clock = Clock::new("UTC").unwrap();

        Supervisor::new(
            memory,
            safety,
            quarantine,
            review,
            users_conn,
            stage1,
            profile("stage1-model"),
            stage2,
            profile("stage2-model"),
            Arc::new(QuotaTracker::new(1000.0)),
            &constitution,
            traits,
            clock,
            SupervisorConfig::default(),
        )
    }

    fn job(user_id: i64, text: &str) -> PipelineJob {
        let msg = InboundMessage {
            user_id: UserId(user_id),
            chat_id: ChatId(user_id),
            message_id: 1,
            text: text.to_string(),
            received_at: chrono::Utc::now(),
            recovered: None,
        };
        PipelineJob::from_batch(UserId(user_id), ChatId(user_id), vec![msg])
    }

    #[tokio::test]
    async fn happy_path_submits_a_pending_review_item() {
        let stage1: Arc<dyn LlmProvider> =
            Arc::new(EchoProvider { name: "stage1", reply: "Sure, we're open!".to_string() });
        let stage2: Arc<dyn LlmProvider> = Arc::new(EchoProvider {
            name: "stage2",
            reply: "Yep!|||BUBBLE|||Open 8 to 6 on Sundays.".to_string(),
        });
        let sup = build_supervisor(stage1, stage2);
        let job = job(1, "is the gym open sunday");

        let outcome = sup.process_job(&job).await.unwrap();
        let review_id = match outcome {
            Outcome::Submitted { review_id } => review_id,
            _ => panic!("expected Submitted"),
        };

        let item = sup.review_for_test().get(review_id).unwrap();
        assert_eq!(item.status, ReviewStatus::Pending);
        assert_eq!(item.refined_bubbles.len(), 2);
        assert!(item.processing_error.is_none());
        assert!(item.llm1.cost_usd > 0.0);
        assert!(item.llm2.cost_usd > 0.0);
    }

    #[tokio::test]
    async fn quarantined_user_is_diverted_without_touching_the_review_queue() {
        let stage1: Arc<dyn LlmProvider> = Arc::new(EchoProvider { name: "stage1", reply: "x".into() });
        let stage2: Arc<dyn LlmProvider> = Arc::new(EchoProvider { name: "stage2", reply: "y".into() });
        let sup = build_supervisor(stage1, stage2);

        sup.quarantine_for_test().activate(UserId(9), Some("abuse report"), "system").unwrap();

        let job = job(9, "hello?");
        let outcome = sup.process_job(&job).await.unwrap();
        assert!(matches!(outcome, Outcome::Diverted));
        assert!(sup.review_for_test().pending(10).unwrap().is_empty());
        assert_eq!(sup.quarantine_for_test().list_for_user(UserId(9)).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stage1_exhausting_retries_yields_a_degraded_review_item() {
        let stage1: Arc<dyn LlmProvider> = Arc::new(FailingProvider { name: "stage1" });
        let stage2: Arc<dyn LlmProvider> = Arc::new(EchoProvider { name: "stage2", reply: "unused".into() });
        let sup = build_supervisor(stage1, stage2);

        let job = job(2, "anyone there?");
        let outcome = sup.process_job(&job).await.unwrap();
        let review_id = match outcome {
            Outcome::Submitted { review_id } => review_id,
            _ => panic!("expected Submitted"),
        };

        let item = sup.review_for_test().get(review_id).unwrap();
        assert_eq!(item.status, ReviewStatus::Pending);
        assert!(item.refined_bubbles.is_empty());
        assert!(item.processing_error.as_deref().unwrap().contains("stage1_failed"));
    }

    #[tokio::test]
    async fn stage2_failure_keeps_the_stage1_draft_but_flags_the_item() {
        let stage1: Arc<dyn LlmProvider> =
            Arc::new(EchoProvider { name: "stage1", reply: "a reasonable draft".into() });
        let stage2: Arc<dyn LlmProvider> = Arc::new(FailingProvider { name: "stage2" });
        let sup = build_supervisor(stage1, stage2);

        let job = job(3, "question");
        let outcome = sup.process_job(&job).await.unwrap();
        let review_id = match outcome {
            Outcome::Submitted { review_id } => review_id,
            _ => panic!("expected Submitted"),
        };

        let item = sup.review_for_test().get(review_id).unwrap();
        assert_eq!(item.draft_text, "a reasonable draft");
        assert!(item.refined_bubbles.is_empty());
        assert!(item.processing_error.as_deref().unwrap().contains("stage2_failed"));
    }

    #[tokio::test]
    async fn a_second_call_for_the_same_user_and_job_is_idempotent_not_busy() {
        let stage1: Arc<dyn LlmProvider> = Arc::new(EchoProvider { name: "stage1", reply: "hi".into() });
        let stage2: Arc<dyn LlmProvider> = Arc::new(EchoProvider { name: "stage2", reply: "hi".into() });
        let sup = build_supervisor(stage1, stage2);

        let job = job(4, "retry me");
        assert!(matches!(sup.process_job(&job).await.unwrap(), Outcome::Submitted { .. }));
        // A worker retrying the exact same job after a crash reuses its
        // own lock slot rather than finding it Busy forever.
        assert!(matches!(sup.process_job(&job).await.unwrap(), Outcome::Submitted { .. }));
    }
}
