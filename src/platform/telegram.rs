use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{
    AllowedUpdate, ButtonRequest, InputFile, KeyboardButton, KeyboardMarkup, WebAppInfo,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::bot::{self, AppState};
use crate::payload::DecodedAttachment;
use crate::platform::Messenger;

/// The process-wide Telegram session. Opened once in `main`, shared by every
/// handler, released when the last reference is dropped at shutdown.
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(token: &str) -> Self {
        info!("Opening Telegram session");
        Self {
            bot: Bot::new(token),
        }
    }

    /// Handle used by the long-polling dispatcher
    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }
}

impl Drop for TelegramMessenger {
    fn drop(&mut self) {
        info!("Telegram session closed");
    }
}

fn allowed_updates() -> Vec<AllowedUpdate> {
    vec![
        AllowedUpdate::Message,
        AllowedUpdate::EditedMessage,
        AllowedUpdate::CallbackQuery,
    ]
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<()> {
        self.bot
            .send_message(chat_id, text)
            .await
            .context("Failed to send message")?;
        Ok(())
    }

    async fn send_web_app_button(
        &self,
        chat_id: ChatId,
        text: &str,
        button_label: &str,
        url: &Url,
    ) -> Result<()> {
        let button = KeyboardButton::new(button_label)
            .request(ButtonRequest::WebApp(WebAppInfo { url: url.clone() }));
        let keyboard = KeyboardMarkup::new(vec![vec![button]]).resize_keyboard();

        self.bot
            .send_message(chat_id, text)
            .reply_markup(keyboard)
            .await
            .context("Failed to send web app keyboard")?;
        Ok(())
    }

    async fn send_document(
        &self,
        chat_id: ChatId,
        attachment: DecodedAttachment,
        caption: &str,
    ) -> Result<()> {
        debug!(
            "Uploading {} ({}, {} bytes) to chat {}",
            attachment.filename,
            attachment.mime,
            attachment.bytes.len(),
            chat_id.0
        );
        let file = InputFile::memory(attachment.bytes).file_name(attachment.filename);

        self.bot
            .send_document(chat_id, file)
            .caption(caption)
            .await
            .context("Failed to upload document")?;
        Ok(())
    }

    async fn register_webhook(&self, url: &Url) -> Result<()> {
        self.bot
            .set_webhook(url.clone())
            .allowed_updates(allowed_updates())
            .await
            .context("Failed to register webhook")?;
        Ok(())
    }
}

/// Run the bot in long-polling mode until Ctrl-C
pub async fn run_polling(state: Arc<AppState>, bot: Bot) -> Result<()> {
    info!("Starting Telegram long polling...");

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_update))
        .branch(Update::filter_edited_message().endpoint(handle_update))
        .branch(Update::filter_callback_query().endpoint(handle_update));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .default_handler(|upd| async move {
            warn!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_update(update: Update, state: Arc<AppState>) -> ResponseResult<()> {
    bot::handle_update(&state, &update).await;
    Ok(())
}
