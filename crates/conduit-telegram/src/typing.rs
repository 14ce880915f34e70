//! Outbound typing indicator. Telegram's `sendChatAction` status expires
//! after ~5 seconds, so a background task refreshes it every 4s until the
//! handle is dropped or stopped.

use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::ChatAction;

/// Handle to a background typing-indicator loop for one chat.
pub struct TypingGuard(tokio::task::JoinHandle<()>);

impl TypingGuard {
    pub fn start(bot: Bot, chat_id: teloxide::types::ChatId) -> Self {
        let handle = tokio::spawn(async move {
            loop {
                let _ = bot.send_chat_action(chat_id, ChatAction::Typing).await;
                tokio::time::sleep(Duration::from_secs(4)).await;
            }
        });
        TypingGuard(handle)
    }

    pub fn stop(self) {
        self.0.abort();
    }
}
