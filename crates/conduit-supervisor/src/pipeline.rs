//! Pipeline orchestration: takes one reserved `PipelineJob` through
//! quarantine diversion, the per-user lock, the two-stage draft/refine
//! call, safety scoring, and `ReviewItem` emission.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use rusqlite::Connection;
use tracing::{info, warn};
use uuid::Uuid;

use conduit_core::clock::Clock;
use conduit_core::config::{ModelProfile, SupervisorConfig};
use conduit_core::types::{
    LlmCallRecord, PipelineJob, Recommendation, ReviewItem, ReviewStatus, SafetyReport,
};
use conduit_core::QuarantineGate;
use conduit_llm::{ChatRequest, LlmProvider, Message, PromptBuilder, QuotaTracker, Role, SessionInfo};
use conduit_memory::{MemoryContext, MemoryStore};
use conduit_quarantine::QuarantineManager;
use conduit_review::ReviewQueue;
use conduit_safety::SafetyAnalyzer;

use crate::error::Result;
use crate::lock::PerUserLock;

/// Sentinel stage-2 is instructed to delimit its 1-4 reply bubbles with.
const BUBBLE_SENTINEL: &str = "|||BUBBLE|||";
const MAX_BUBBLES: usize = 4;

const STAGE1_PROFILE: &str = "stage1";
const STAGE2_PROFILE: &str = "stage2";

/// Result of handing one job to [`Supervisor::process_job`].
pub enum Outcome {
    /// User is quarantined; the job's messages were diverted, nothing else
    /// to do.
    Diverted,
    /// Another in-flight job already holds this user's processing lock.
    /// The caller should nack and let the reservation lapse for a retry.
    Busy,
    /// A `ReviewItem` was built and submitted — possibly in degraded form
    /// if generation failed partway through.
    Submitted { review_id: Uuid },
}

pub struct Supervisor {
    memory: Arc<MemoryStore>,
    safety: Arc<SafetyAnalyzer>,
    quarantine: Arc<QuarantineManager>,
    review: Arc<ReviewQueue>,
    users_conn: Mutex<Connection>,
    stage1: Arc<dyn LlmProvider>,
    stage1_profile: ModelProfile,
    stage2: Arc<dyn LlmProvider>,
    stage2_profile: ModelProfile,
    quota: Arc<QuotaTracker>,
    prompt_builder: PromptBuilder,
    stage1_system: String,
    clock: Clock,
    lock: PerUserLock,
    config: SupervisorConfig,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        memory: Arc<MemoryStore>,
        safety: Arc<SafetyAnalyzer>,
        quarantine: Arc<QuarantineManager>,
        review: Arc<ReviewQueue>,
        users_conn: Connection,
        stage1: Arc<dyn LlmProvider>,
        stage1_profile: ModelProfile,
        stage2: Arc<dyn LlmProvider>,
        stage2_profile: ModelProfile,
        quota: Arc<QuotaTracker>,
        persona_constitution: &str,
        persona_traits: &str,
        clock: Clock,
        config: SupervisorConfig,
    ) -> Self {
        let lock = PerUserLock::new(Duration::from_secs(config.lock_ttl_secs));
        Self {
            memory,
            safety,
            quarantine,
            review,
            users_conn: Mutex::new(users_conn),
            stage1,
            stage1_profile,
            stage2,
            stage2_profile,
            quota,
            prompt_builder: PromptBuilder::new(persona_constitution, persona_traits),
            stage1_system: persona_traits.to_string(),
            clock,
            lock,
            config,
        }
    }

    /// Runs the full pipeline for `job`. Never returns an error for an
    /// unrecoverable generation failure — those are absorbed into a
    /// degraded `ReviewItem` per the supervisor's failure contract. A
    /// `Result::Err` here means an infrastructure failure (DB write,
    /// review-store write) that the caller should nack and retry.
    pub async fn process_job(&self, job: &PipelineJob) -> Result<Outcome> {
        if self.quarantine.is_active(job.user_id) {
            self.quarantine.store_many(&job.messages)?;
            info!(job_id = %job.job_id, user_id = %job.user_id, "diverted into quarantine");
            return Ok(Outcome::Diverted);
        }

        if !self.lock.acquire(job.user_id, &job.job_id.to_string()) {
            return Ok(Outcome::Busy);
        }
        let outcome = self.process_locked(job).await;
        self.lock.release(job.user_id);
        outcome
    }

    async fn process_locked(&self, job: &PipelineJob) -> Result<Outcome> {
        self.memory.save_turn(job.user_id.0, "user", &job.coalesced_text)?;

        let (draft_text, refined_bubbles, llm1, llm2, processing_error) =
            self.run_generation(job).await;

        let safety = if processing_error.is_some() {
            SafetyReport { risk_score: 0.0, flags: vec![], recommendation: Recommendation::Review }
        } else {
            self.safety.analyze(&refined_bubbles.join(" "))
        };

        let customer_status = conduit_users::store::get_or_create_status(
            &self.users_conn.lock().unwrap(),
            job.user_id,
        )
        .ok()
        .map(|s| s.customer_status);

        let priority_score = self.priority_score(job, &safety);
        let now = Utc::now();
        let item = ReviewItem {
            review_id: Uuid::now_v7(),
            user_id: job.user_id,
            chat_id: job.chat_id,
            inbound_text: job.coalesced_text.clone(),
            last_inbound_message_id: job.messages.last().map(|m| m.message_id).unwrap_or(0),
            draft_text,
            refined_bubbles,
            final_bubbles: None,
            safety,
            llm1,
            llm2,
            priority_score,
            status: ReviewStatus::Pending,
            reviewer_id: None,
            review_started_at: None,
            review_completed_at: None,
            edit_tags: vec![],
            quality_score: None,
            cta: None,
            customer_status,
            processing_error,
            delivery_failed_reason: None,
            delivered_at: None,
            created_at: now,
            updated_at: now,
        };

        let review_id = item.review_id;
        self.review.submit(&item)?;
        Ok(Outcome::Submitted { review_id })
    }

    /// Runs stage 1 and stage 2. Any failure here is absorbed rather than
    /// propagated: the pipeline has already committed the user's turn to
    /// memory by this point, so the job must still land a (possibly
    /// degraded) `ReviewItem` rather than being endlessly retried.
    async fn run_generation(
        &self,
        job: &PipelineJob,
    ) -> (String, Vec<String>, LlmCallRecord, LlmCallRecord, Option<String>) {
        let ctx = self.memory.build_context(job.user_id.0).unwrap_or_else(|e| {
            warn!(job_id = %job.job_id, err = %e, "memory context fetch failed, continuing with empty context");
            MemoryContext {
                user_id: job.user_id.0,
                rendered: String::new(),
                recent_turn_count: 0,
                digest_count: 0,
                built_at: Utc::now(),
            }
        });

        let (draft_text, llm1) = match self.call_stage1(job, &ctx).await {
            Ok(v) => v,
            Err(e) => {
                warn!(job_id = %job.job_id, err = %e, "stage1 unrecoverable, falling back to empty draft");
                return (
                    String::new(),
                    vec![],
                    LlmCallRecord::default(),
                    LlmCallRecord::default(),
                    Some(format!("stage1_failed: {e}")),
                );
            }
        };

        match self.call_stage2(job, &ctx, &draft_text).await {
            Ok((bubbles, llm2)) => (draft_text, bubbles, llm1, llm2, None),
            Err(e) => {
                warn!(job_id = %job.job_id, err = %e, "stage2 unrecoverable, surfacing best-effort draft");
                (draft_text, vec![], llm1, LlmCallRecord::default(), Some(format!("stage2_failed: {e}")))
            }
        }
    }

    async fn call_stage1(
        &self,
        job: &PipelineJob,
        ctx: &MemoryContext,
    ) -> std::result::Result<(String, LlmCallRecord), String> {
        if self.quota.would_exceed(STAGE1_PROFILE, 0.0) {
            return Err("stage1 daily quota already exhausted".to_string());
        }

        let req = ChatRequest {
            model: self.stage1_profile.model.clone(),
            system: self.stage1_system.clone(),
            system_prompt: None,
            messages: vec![Message {
                role: Role::User,
                content: format!("{}\n\n{}", ctx.rendered, job.coalesced_text),
            }],
            max_tokens: self.stage1_profile.max_tokens,
        };

        let attempts = self.config.stage1_retries.max(1);
        let mut last_err = String::new();
        for attempt in 0..attempts {
            let started = Instant::now();
            match self.stage1.send(&req).await {
                Ok(resp) => {
                    let cost = self.stage1_profile.cost_usd(resp.tokens_in, resp.cached_tokens, resp.tokens_out);
                    self.quota.record(STAGE1_PROFILE, cost);
                    return Ok((
                        resp.content,
                        LlmCallRecord {
                            provider: self.stage1.name().to_string(),
                            model: resp.model,
                            prompt_tokens: resp.tokens_in,
                            completion_tokens: resp.tokens_out,
                            cached_prompt_tokens: resp.cached_tokens,
                            cost_usd: cost,
                            latency_ms: started.elapsed().as_millis() as u64,
                        },
                    ));
                }
                Err(e) => {
                    warn!(job_id = %job.job_id, attempt, err = %e, "stage1 call failed");
                    last_err = e.to_string();
                }
            }
        }
        Err(last_err)
    }

    async fn call_stage2(
        &self,
        job: &PipelineJob,
        ctx: &MemoryContext,
        draft: &str,
    ) -> std::result::Result<(Vec<String>, LlmCallRecord), String> {
        if self.quota.would_exceed(STAGE2_PROFILE, 0.0) {
            return Err("stage2 daily quota already exhausted".to_string());
        }

        let session = SessionInfo {
            turn_count: ctx.recent_turn_count as u32 + 1,
            local_time_line: self.clock.current_local_line(),
        };
        let prompt = self.prompt_builder.build(Some(&ctx.rendered), Some(&session));

        let suffix = format!(
            "Original message: {}\n\nDraft reply: {}\n\nVary your phrasing from whatever you've \
             already told this person in the context above. Split your final reply into 1 to {} \
             short conversational bubbles, delimited by the exact sentinel {}, with no other \
             commentary.",
            job.coalesced_text, draft, MAX_BUBBLES, BUBBLE_SENTINEL
        );

        let req = ChatRequest {
            model: self.stage2_profile.model.clone(),
            system: prompt.to_plain_text(),
            system_prompt: Some(prompt),
            messages: vec![Message { role: Role::User, content: suffix }],
            max_tokens: self.stage2_profile.max_tokens,
        };

        match self.stage2.send(&req).await {
            Ok(resp) => {
                let cost = self.stage2_profile.cost_usd(resp.tokens_in, resp.cached_tokens, resp.tokens_out);
                self.quota.record(STAGE2_PROFILE, cost);
                Ok((
                    parse_bubbles(&resp.content),
                    LlmCallRecord {
                        provider: self.stage2.name().to_string(),
                        model: resp.model,
                        prompt_tokens: resp.tokens_in,
                        completion_tokens: resp.tokens_out,
                        cached_prompt_tokens: resp.cached_tokens,
                        cost_usd: cost,
                        latency_ms: 0,
                    },
                ))
            }
            Err(e) => {
                warn!(job_id = %job.job_id, err = %e, "stage2 call failed");
                Err(e.to_string())
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn review_for_test(&self) -> &ReviewQueue {
        &self.review
    }

    #[cfg(test)]
    pub(crate) fn quarantine_for_test(&self) -> &QuarantineManager {
        &self.quarantine
    }

    fn priority_score(&self, job: &PipelineJob, safety: &SafetyReport) -> f64 {
        let volume = (job.messages.len() as f64 / 5.0).min(1.0);
        // No richer "recently quarantined" signal is exposed than the
        // current activation state, so this term is a 0/1 flag rather than
        // a decayed recency score.
        let quarantine_recent = if self.quarantine.is_active(job.user_id) { 1.0 } else { 0.0 };
        self.config.priority_weight_safety * safety.risk_score
            + self.config.priority_weight_volume * volume
            + self.config.priority_weight_quarantine * quarantine_recent
    }
}

/// Splits stage 2's output on [`BUBBLE_SENTINEL`], trims and drops empty
/// segments, and caps at [`MAX_BUBBLES`]. Falls back to a single bubble
/// holding the whole trimmed response if the model didn't use the
/// sentinel at all.
fn parse_bubbles(content: &str) -> Vec<String> {
    let mut bubbles: Vec<String> = content
        .split(BUBBLE_SENTINEL)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if bubbles.is_empty() {
        let trimmed = content.trim();
        if !trimmed.is_empty() {
            bubbles.push(trimmed.to_string());
        }
    }

    bubbles.truncate(MAX_BUBBLES);
    bubbles
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bubbles_splits_on_sentinel_and_trims() {
        let content = format!(" Hey! {BUBBLE_SENTINEL} Yes we're open Sundays. {BUBBLE_SENTINEL}  ");
        let bubbles = parse_bubbles(&content);
        assert_eq!(bubbles, vec!["Hey!".to_string(), "Yes we're open Sundays.".to_string()]);
    }

    #[test]
    fn parse_bubbles_falls_back_to_whole_response_without_a_sentinel() {
        let bubbles = parse_bubbles("just one reply, no delimiter");
        assert_eq!(bubbles, vec!["just one reply, no delimiter".to_string()]);
    }

    #[test]
    fn parse_bubbles_caps_at_four() {
        let content = (0..6).map(|i| format!("bubble {i}")).collect::<Vec<_>>().join(BUBBLE_SENTINEL);
        let bubbles = parse_bubbles(&content);
        assert_eq!(bubbles.len(), MAX_BUBBLES);
    }

    #[test]
    fn parse_bubbles_drops_empty_segments() {
        let content = format!("hi{BUBBLE_SENTINEL}{BUBBLE_SENTINEL}bye");
        let bubbles = parse_bubbles(&content);
        assert_eq!(bubbles, vec!["hi".to_string(), "bye".to_string()]);
    }
}
