use conduit_core::types::{ChatId, TransportMessageId, UserId};
use serde::{Deserialize, Serialize};

/// Runtime connection state of a transport adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportStatus {
    Connected,
    Connecting,
    Disconnected,
    Error(String),
}

/// Opaque handle returned by `resolve_entity` — concrete
/// transports stuff whatever they need (a chat peer object, an access
/// hash) behind this so callers outside `conduit-telegram` never depend
/// on a specific transport's native types.
#[derive(Debug, Clone)]
pub struct EntityHandle(pub serde_json::Value);

/// A historical message returned by `scan_history`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub message_id: TransportMessageId,
    pub text: String,
    pub received_at: chrono::DateTime<chrono::Utc>,
}

/// A user's typing state, pushed to subscribers of typing events and
/// consumed by the Activity Tracker's adaptive window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypingEvent {
    pub chat_id: ChatId,
    pub is_typing: bool,
}
