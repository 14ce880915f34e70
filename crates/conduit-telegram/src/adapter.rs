//! Concrete `Transport` implementation backed by a long-polling teloxide
//! `Bot`. Inbound messages are pushed onto an mpsc channel for the Activity
//! Tracker to consume — this crate has no opinion on batching or pipeline
//! invocation, only on moving bytes to and from Telegram.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use teloxide::prelude::*;
use tracing::info;

use conduit_core::types::{ChatId, InboundMessage, UserId};
use conduit_transport::{EntityHandle, HistoryMessage, Transport, TransportError, TransportStatus};

use crate::error::{classify_resolve_error, classify_send_error};
use crate::handler::run_dispatcher;
use crate::send;
use crate::typing::TypingGuard;

/// Telegram transport adapter. One per running bot token.
pub struct TelegramTransport {
    bot: Bot,
    status: Mutex<TransportStatus>,
}

impl TelegramTransport {
    pub fn new(bot_token: &str) -> Self {
        Self {
            bot: Bot::new(bot_token),
            status: Mutex::new(TransportStatus::Disconnected),
        }
    }

    /// Drives the long-polling dispatcher until the process exits, pushing
    /// every accepted inbound message to `inbound_tx`. Never returns under
    /// normal operation.
    pub async fn run(self: Arc<Self>, inbound_tx: tokio::sync::mpsc::Sender<InboundMessage>) {
        *self.status.lock().unwrap() = TransportStatus::Connecting;
        info!("telegram transport: starting long-poll dispatcher");
        run_dispatcher(self.bot.clone(), inbound_tx).await;
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn connect(&self) -> Result<(), TransportError> {
        self.bot
            .get_me()
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        *self.status.lock().unwrap() = TransportStatus::Connected;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        *self.status.lock().unwrap() = TransportStatus::Disconnected;
        Ok(())
    }

    fn status(&self) -> TransportStatus {
        self.status.lock().unwrap().clone()
    }

    async fn send(&self, chat_id: ChatId, text: &str) -> Result<(), TransportError> {
        send::send_response(&self.bot, teloxide::types::ChatId(chat_id.0), text).await
    }

    async fn set_typing(&self, chat_id: ChatId, is_typing: bool) -> Result<(), TransportError> {
        if !is_typing {
            return Ok(());
        }
        self.bot
            .send_chat_action(
                teloxide::types::ChatId(chat_id.0),
                teloxide::types::ChatAction::Typing,
            )
            .await
            .map(|_| ())
            .map_err(|e| classify_send_error(e, "set_typing"))
    }

    /// Bot API exposes no arbitrary history scan; Telegram only pushes
    /// updates forward from whenever the bot starts polling. Recovery for
    /// messages that arrived while the process was down instead replays
    /// from `conduit-wal`'s durable buffer, not from the transport.
    async fn scan_history(
        &self,
        _chat_id: ChatId,
        _since_message_id: i64,
        _limit: usize,
    ) -> Result<Vec<HistoryMessage>, TransportError> {
        Ok(Vec::new())
    }

    async fn resolve_entity(&self, user_id: UserId) -> Result<EntityHandle, TransportError> {
        let chat = self
            .bot
            .get_chat(teloxide::types::ChatId(user_id.0))
            .await
            .map_err(|e| classify_resolve_error(e, user_id.0))?;
        Ok(EntityHandle(serde_json::json!({
            "chat_id": chat.id.0,
            "kind": format!("{:?}", chat.kind),
        })))
    }
}

/// Starts a typing indicator loop for the duration of pipeline processing
/// of one job; callers stop it once a response (or failure) is ready.
pub fn start_typing(bot: Bot, chat_id: ChatId) -> TypingGuard {
    TypingGuard::start(bot, teloxide::types::ChatId(chat_id.0))
}
