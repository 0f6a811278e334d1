//! Outbound Telegram notifications.
//!
//! Strictly fire-and-forget: a Telegram outage must never stall or fail a
//! trading decision, so delivery errors are logged and swallowed here.

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::InputFile;
use tracing::warn;

use common::NotifierService;

/// Sends messages and charts to a single operator chat.
pub struct TelegramNotifier {
    bot: Bot,
    chat_id: ChatId,
}

impl TelegramNotifier {
    pub fn new(token: impl Into<String>, chat_id: i64) -> Self {
        Self {
            bot: Bot::new(token.into()),
            chat_id: ChatId(chat_id),
        }
    }
}

#[async_trait]
impl NotifierService for TelegramNotifier {
    async fn send_message(&self, text: &str) {
        if let Err(e) = self.bot.send_message(self.chat_id, text).await {
            warn!(error = %e, "Failed to send Telegram message");
        }
    }

    async fn send_image(&self, image: &[u8], caption: &str) {
        let photo = InputFile::memory(image.to_vec());
        if let Err(e) = self
            .bot
            .send_photo(self.chat_id, photo)
            .caption(caption.to_string())
            .await
        {
            warn!(error = %e, "Failed to send Telegram image");
        }
    }
}
