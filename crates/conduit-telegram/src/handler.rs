//! Inbound message handler registered in the teloxide `Dispatcher`.
//!
//! Maps a raw teloxide `Message` into `conduit_core::types::InboundMessage`
//! and hands it to the Activity Tracker via channel. This crate makes no
//! batching or pipeline decisions of its own.

use teloxide::prelude::*;
use tokio::sync::mpsc::Sender;
use tracing::warn;

use conduit_core::types::{ChatId, InboundMessage, UserId};

/// Registers the message endpoint and runs the dispatcher until the
/// process exits.
pub async fn run_dispatcher(bot: Bot, inbound_tx: Sender<InboundMessage>) {
    let handler = Update::filter_message().endpoint(on_message);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![inbound_tx])
        .default_handler(|_upd| async {})
        .build()
        .dispatch()
        .await;
}

async fn on_message(msg: Message, inbound_tx: Sender<InboundMessage>) -> ResponseResult<()> {
    // Ignore messages from other bots — this system only handles human traffic.
    if msg.from.as_ref().map(|u| u.is_bot).unwrap_or(false) {
        return Ok(());
    }

    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };

    let text = msg.text().or(msg.caption()).unwrap_or("").to_string();
    if text.is_empty() {
        // Rich media with no caption is out of scope (Non-goals).
        return Ok(());
    }

    let inbound = InboundMessage {
        user_id: UserId(from.id.0 as i64),
        chat_id: ChatId(msg.chat.id.0),
        message_id: msg.id.0 as i64,
        text,
        received_at: msg.date,
        recovered: None,
    };

    if let Err(e) = inbound_tx.send(inbound).await {
        warn!(error = %e, "activity tracker channel closed, dropping inbound message");
    }

    Ok(())
}
