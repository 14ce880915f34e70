use chrono::{DateTime, Utc};
use conduit_core::types::PipelineJob;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a queued entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Waiting for a worker to reserve it.
    Pending,
    /// Reserved by a worker; invisible to other reservers until the lease expires.
    Reserved,
    /// Acked by the worker that processed it — terminal.
    Done,
    /// Nacked or lease-expired past the retry budget — terminal, kept for audit.
    DeadLettered,
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Reserved => "reserved",
            QueueStatus::Done => "done",
            QueueStatus::DeadLettered => "dead_lettered",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QueueStatus::Pending),
            "reserved" => Ok(QueueStatus::Reserved),
            "done" => Ok(QueueStatus::Done),
            "dead_lettered" => Ok(QueueStatus::DeadLettered),
            other => Err(format!("unknown queue status: {other}")),
        }
    }
}

/// A write-ahead-logged pipeline job, wrapped with queue bookkeeping.
///
/// `job.job_id` (the `PipelineJob`'s own UUID) is the dedup key: enqueuing
/// the same `job_id` twice is a no-op, so a crash-and-retry on the caller
/// side never double-delivers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedJob {
    pub job: PipelineJob,
    pub status: QueueStatus,
    pub attempts: u32,
    pub reserved_by: Option<String>,
    pub lease_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
