use async_trait::async_trait;
use conduit_core::types::{ChatId, UserId};

use crate::{
    error::TransportError,
    types::{EntityHandle, HistoryMessage, TransportStatus},
};

/// The capability set the core requires from a chat transport, generalized
/// from a duck-typed per-channel client into a single polymorphic trait.
/// `conduit-telegram` is the only concrete implementation in this
/// workspace; the trait exists so the rest of the pipeline never depends
/// on teloxide directly.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    async fn connect(&self) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
    fn status(&self) -> TransportStatus;

    async fn send(&self, chat_id: ChatId, text: &str) -> Result<(), TransportError>;
    async fn set_typing(&self, chat_id: ChatId, is_typing: bool) -> Result<(), TransportError>;

    /// Returns up to `limit` messages newer than `since_message_id`,
    /// used by the Recovery Agent.
    async fn scan_history(
        &self,
        chat_id: ChatId,
        since_message_id: i64,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, TransportError>;

    /// Warms/looks up the opaque handle needed to address a user without a
    /// cold resolve at send time.
    async fn resolve_entity(&self, user_id: UserId) -> Result<EntityHandle, TransportError>;
}
