use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque 64-bit identifier assigned by the transport. Primary partitioning
/// key of nearly every structure in the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(v: i64) -> Self {
        UserId(v)
    }
}

/// Opaque 64-bit chat identifier. Kept distinct from `UserId` because a
/// transport's private-chat id and account id are not guaranteed to
/// coincide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ChatId {
    fn from(v: i64) -> Self {
        ChatId(v)
    }
}

/// Monotonic-per-chat message id assigned by the transport.
pub type TransportMessageId = i64;

/// Age-based classification a recovered message is tagged with; forwarded
/// by the Supervisor into the resulting ReviewItem's priority calculation
///.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryTier {
    Tier1,
    Tier2,
    Tier3,
}

/// A message as received from the transport, before batching. Immutable
/// once constructed; owned by the WAL from enqueue until the Supervisor
/// acknowledges the job it ends up in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub message_id: TransportMessageId,
    pub text: String,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub recovered: Option<RecoveryTier>,
}

/// Produced by the Activity Tracker (C2) once a batching window closes;
/// consumed exactly once by a Supervisor worker. `job_id` is the dedup key
/// for the WAL's at-least-once delivery contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineJob {
    pub job_id: Uuid,
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub messages: Vec<InboundMessage>,
    pub coalesced_text: String,
    pub created_at: DateTime<Utc>,
}

impl PipelineJob {
    /// Concatenates message text with single newline separators in receive
    /// order.
    pub fn from_batch(user_id: UserId, chat_id: ChatId, messages: Vec<InboundMessage>) -> Self {
        let coalesced_text = messages
            .iter()
            .map(|m| m.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        PipelineJob {
            job_id: Uuid::now_v7(),
            user_id,
            chat_id,
            messages,
            coalesced_text,
            created_at: Utc::now(),
        }
    }

    /// Most urgent recovery tier carried by any message in the job, if any.
    pub fn recovery_tier(&self) -> Option<RecoveryTier> {
        self.messages
            .iter()
            .filter_map(|m| m.recovered)
            .min_by_key(|t| match t {
                RecoveryTier::Tier1 => 0,
                RecoveryTier::Tier2 => 1,
                RecoveryTier::Tier3 => 2,
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One entry in a user's append-only conversation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bubbles: Option<Vec<String>>,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        ConversationTurn {
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
            bubbles: None,
        }
    }

    pub fn assistant(bubbles: Vec<String>) -> Self {
        ConversationTurn {
            role: Role::Assistant,
            content: bubbles.join(" "),
            timestamp: Utc::now(),
            bubbles: Some(bubbles),
        }
    }
}

/// Per-call LLM accounting, attached to a ReviewItem's `llm1`/`llm2` fields
///.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmCallRecord {
    pub provider: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub cached_prompt_tokens: u32,
    pub cost_usd: f64,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Approve,
    Review,
    Flag,
}

/// Deterministic output of the Safety Analyzer (C5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyReport {
    pub risk_score: f64,
    pub flags: Vec<String>,
    pub recommendation: Recommendation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Reviewing,
    Approved,
    Rejected,
    Cancelled,
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Reviewing => "reviewing",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Rejected => "rejected",
            ReviewStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ReviewStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "reviewing" => Ok(Self::Reviewing),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown review status: {other}")),
        }
    }
}

impl ReviewStatus {
    /// Enforces the review state machine: pending -> reviewing ->
    /// {approved|rejected|cancelled}; cancelled from reviewing returns to
    /// pending. No other transition is reachable.
    pub fn can_transition_to(self, next: ReviewStatus) -> bool {
        use ReviewStatus::*;
        matches!(
            (self, next),
            (Pending, Reviewing)
                | (Reviewing, Approved)
                | (Reviewing, Rejected)
                | (Reviewing, Cancelled)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CtaTier {
    Soft,
    Medium,
    Direct,
}

/// CTA metadata stored verbatim from the approval body. The
/// core never authors CTA strings itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CtaMetadata {
    pub inserted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<CtaTier>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_bubble_index: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CustomerStatus {
    Prospect,
    LeadQualified,
    Customer,
    Churned,
    LeadExhausted,
}

impl std::fmt::Display for CustomerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CustomerStatus::Prospect => "PROSPECT",
            CustomerStatus::LeadQualified => "LEAD_QUALIFIED",
            CustomerStatus::Customer => "CUSTOMER",
            CustomerStatus::Churned => "CHURNED",
            CustomerStatus::LeadExhausted => "LEAD_EXHAUSTED",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for CustomerStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PROSPECT" => Ok(Self::Prospect),
            "LEAD_QUALIFIED" => Ok(Self::LeadQualified),
            "CUSTOMER" => Ok(Self::Customer),
            "CHURNED" => Ok(Self::Churned),
            "LEAD_EXHAUSTED" => Ok(Self::LeadExhausted),
            other => Err(format!("unknown customer status: {other}")),
        }
    }
}

/// The closed edit taxonomy reviewers may attach to an approval. Unknown
/// tags are rejected by the Review API.
pub const EDIT_TAXONOMY: &[&str] = &[
    "TONE_CASUAL",
    "TONE_FLIRT_UP",
    "TONE_CRINGE_DOWN",
    "TONE_ENERGY_UP",
    "TONE_LESS_AI",
    "TONE_ROMANTIC_UP",
    "STRUCT_SHORTEN",
    "STRUCT_BUBBLE",
    "CONTENT_EMOJI_ADD",
    "CONTENT_EMOJI_CUT",
    "CONTENT_QUESTION_ADD",
    "CONTENT_QUESTION_CUT",
    "CONTENT_REWRITE",
    "CONTENT_SENTENCE_ADD",
    "ENGLISH_SLANG",
    "TEXT_SPEAK",
    "CTA_SOFT",
    "CTA_MEDIUM",
    "CTA_DIRECT",
];

pub fn is_known_edit_tag(tag: &str) -> bool {
    EDIT_TAXONOMY.contains(&tag)
}

/// The unit of human review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewItem {
    pub review_id: Uuid,
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub inbound_text: String,
    /// `message_id` of the latest `InboundMessage` in the job this item was
    /// generated from; the cursor Delivery advances to once it sends.
    pub last_inbound_message_id: TransportMessageId,
    pub draft_text: String,
    pub refined_bubbles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_bubbles: Option<Vec<String>>,
    pub safety: SafetyReport,
    pub llm1: LlmCallRecord,
    pub llm2: LlmCallRecord,
    pub priority_score: f64,
    pub status: ReviewStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub edit_tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cta: Option<CtaMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_status: Option<CustomerStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_failed_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-user standing record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCurrentStatus {
    pub user_id: UserId,
    pub customer_status: CustomerStatus,
    pub ltv_total_usd: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
}

/// Append-only audit row for a `customer_status`/`ltv` change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusTransition {
    pub id: i64,
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_status: Option<CustomerStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_status: Option<CustomerStatus>,
    pub delta_ltv: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub performer: String,
    pub at: DateTime<Utc>,
}

/// Per-user silence-protocol flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolStatus {
    pub user_id: UserId,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performer: Option<String>,
}

impl ProtocolStatus {
    pub fn inactive(user_id: UserId) -> Self {
        ProtocolStatus {
            user_id,
            active: false,
            since: None,
            reason: None,
            performer: None,
        }
    }
}

/// Message diverted away from the generative pipeline while a user is
/// quarantined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantineMessage {
    pub q_id: Uuid,
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub text: String,
    pub received_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Last transport message id known to have been processed for a user; used
/// by the Recovery Agent to detect missed messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageCursor {
    pub user_id: UserId,
    pub last_processed_transport_message_id: TransportMessageId,
    pub last_processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStatus {
    Running,
    Completed,
    Halted,
}

/// Durable audit record of one Recovery Agent sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryOperation {
    pub op_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub users_scanned: u64,
    pub messages_recovered: u64,
    pub errors: u64,
    pub status: RecoveryStatus,
}
