use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of fact this is. Priority order for prompt injection:
/// instruction > preference > fact > context (higher = included first).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryCategory {
    Instruction,
    Preference,
    Fact,
    Context,
}

impl std::fmt::Display for MemoryCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Instruction => write!(f, "instruction"),
            Self::Preference => write!(f, "preference"),
            Self::Fact => write!(f, "fact"),
            Self::Context => write!(f, "context"),
        }
    }
}

impl std::str::FromStr for MemoryCategory {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "instruction" => Ok(Self::Instruction),
            "preference" => Ok(Self::Preference),
            "fact" => Ok(Self::Fact),
            "context" => Ok(Self::Context),
            other => Err(format!("unknown memory category: {other}")),
        }
    }
}

/// How the fact was acquired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemorySource {
    /// User explicitly stated this ("I'm vegetarian").
    UserSaid,
    /// The analyzer/pipeline inferred it from conversation context.
    Inferred,
    /// An operator set this on behalf of the user via the review API.
    OperatorSet,
}

impl std::fmt::Display for MemorySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UserSaid => write!(f, "user_said"),
            Self::Inferred => write!(f, "inferred"),
            Self::OperatorSet => write!(f, "operator_set"),
        }
    }
}

impl std::str::FromStr for MemorySource {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user_said" => Ok(Self::UserSaid),
            "inferred" => Ok(Self::Inferred),
            "operator_set" => Ok(Self::OperatorSet),
            other => Err(format!("unknown memory source: {other}")),
        }
    }
}

/// Single durable fact about a user. Expires after `memory_ttl_days` unless
/// `source` is `OperatorSet`, which instead uses `profile_ttl_days`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMemory {
    pub id: i64,
    pub user_id: i64,
    pub category: MemoryCategory,
    pub key: String,
    pub value: String,
    /// 0.0-1.0. Higher confidence wins on upsert; equal/lower is dropped.
    pub confidence: f64,
    pub source: MemorySource,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A raw turn in a user's conversation history, as stored before it ages
/// out of the recent window and gets folded into a [`HistoryDigest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTurn {
    pub id: i64,
    pub user_id: i64,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Compression tier applied to history once it ages out of the raw window.
/// Both levels are produced deterministically (day/week bucketing and
/// truncation) — no model call is involved in summarizing old history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CompressionLevel {
    /// One bucket per calendar day.
    Daily = 2,
    /// One bucket per ISO week, produced by folding Daily buckets further.
    Weekly = 3,
}

impl std::fmt::Display for CompressionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompressionLevel::Daily => write!(f, "daily"),
            CompressionLevel::Weekly => write!(f, "weekly"),
        }
    }
}

impl std::str::FromStr for CompressionLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(CompressionLevel::Daily),
            "weekly" => Ok(CompressionLevel::Weekly),
            other => Err(format!("unknown compression level: {other}")),
        }
    }
}

/// A rolled-up summary of history that aged out of the raw window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryDigest {
    pub id: i64,
    pub user_id: i64,
    pub level: CompressionLevel,
    /// e.g. "2026-07-30" for Daily, "2026-W30" for Weekly.
    pub window_label: String,
    pub summary: String,
    pub turn_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Rendered memory + history ready for prompt injection, bounded in size.
#[derive(Debug, Clone)]
pub struct MemoryContext {
    pub user_id: i64,
    pub rendered: String,
    pub recent_turn_count: usize,
    pub digest_count: usize,
    pub built_at: DateTime<Utc>,
}
