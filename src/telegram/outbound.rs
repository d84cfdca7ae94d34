//! Sending replies: the `Outbound` seam and its Telegram implementation.

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{CallbackQueryId, FileId, InlineKeyboardButton, InlineKeyboardMarkup, InputFile};
use thiserror::Error;

use crate::core::types::{Button, Keyboard};

#[derive(Debug, Error)]
pub enum OutboundError {
    #[error("Telegram request failed: {0}")]
    Telegram(#[from] teloxide::RequestError),

    #[error("delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait Outbound: Send + Sync {
    async fn send_message(&self, chat_id: i64, text: &str, keyboard: Option<&Keyboard>) -> Result<(), OutboundError>;

    /// `photo` is either a platform file id or an http(s) URL.
    async fn send_photo(
        &self,
        chat_id: i64,
        photo: &str,
        caption: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<(), OutboundError>;

    async fn ack_callback(&self, callback_id: &str) -> Result<(), OutboundError>;
}

#[derive(Clone)]
pub struct TelegramOutbound {
    bot: Bot,
}

impl TelegramOutbound {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

/// Converts a keyboard into Telegram's inline markup.
///
/// Buttons with an unparsable URL are dropped rather than failing the send.
pub fn to_markup(keyboard: &Keyboard) -> InlineKeyboardMarkup {
    let rows = keyboard.rows.iter().map(|row| {
        row.iter()
            .filter_map(|button| match button {
                Button::Callback { label, action } => {
                    Some(InlineKeyboardButton::callback(label.clone(), action.clone()))
                }
                Button::Url { label, url } => match url::Url::parse(url) {
                    Ok(url) => Some(InlineKeyboardButton::url(label.clone(), url)),
                    Err(e) => {
                        log::warn!("Dropping button {:?} with invalid url {}: {}", label, url, e);
                        None
                    }
                },
            })
            .collect::<Vec<_>>()
    });
    InlineKeyboardMarkup::new(rows)
}

fn photo_input(photo: &str) -> InputFile {
    match url::Url::parse(photo) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => InputFile::url(url),
        _ => InputFile::file_id(FileId(photo.to_string())),
    }
}

#[async_trait]
impl Outbound for TelegramOutbound {
    async fn send_message(&self, chat_id: i64, text: &str, keyboard: Option<&Keyboard>) -> Result<(), OutboundError> {
        let mut request = self.bot.send_message(ChatId(chat_id), text);
        if let Some(keyboard) = keyboard {
            request = request.reply_markup(to_markup(keyboard));
        }
        request.await?;
        Ok(())
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        photo: &str,
        caption: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<(), OutboundError> {
        let mut request = self.bot.send_photo(ChatId(chat_id), photo_input(photo)).caption(caption);
        if let Some(keyboard) = keyboard {
            request = request.reply_markup(to_markup(keyboard));
        }
        request.await?;
        Ok(())
    }

    async fn ack_callback(&self, callback_id: &str) -> Result<(), OutboundError> {
        self.bot
            .answer_callback_query(CallbackQueryId(callback_id.to_string()))
            .await?;
        Ok(())
    }
}
