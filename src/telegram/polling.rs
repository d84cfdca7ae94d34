//! Long-polling update source and the connector that opens it.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use secrecy::{ExposeSecret, SecretString};
use teloxide::prelude::*;
use teloxide::types::{AllowedUpdate, CallbackQuery, UpdateKind, User};
use teloxide::{ApiError, RequestError};

use crate::core::config;
use crate::core::types::{Attachment, CallbackAction, InboundEvent, Sender, TextMessage};
use crate::source::{Connection, Connector, SourceError, UpdateSource};
use crate::telegram::outbound::TelegramOutbound;

/// Opens Telegram bots by token.
#[derive(Clone, Default)]
pub struct TelegramConnector {
    api_url: Option<url::Url>,
}

impl TelegramConnector {
    pub fn new(api_url: Option<url::Url>) -> Self {
        Self { api_url }
    }

    /// Bot handle with the configured HTTP timeout and API endpoint.
    pub fn build_bot(&self, token: &str) -> Result<Bot, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(config::polling::http_timeout())
            .build()
            .map_err(|e| SourceError::ConnectionFailed(format!("http client: {}", e)))?;
        let bot = Bot::with_client(token, client);
        Ok(match &self.api_url {
            Some(url) => bot.set_api_url(url.clone()),
            None => bot,
        })
    }
}

/// Maps a request failure onto the credential/connection split.
pub fn classify(err: &RequestError) -> SourceError {
    match err {
        // Telegram answers both 401 and 404 to a bad token; teloxide folds them here
        RequestError::Api(ApiError::InvalidToken) => SourceError::CredentialInvalid(err.to_string()),
        _ => SourceError::ConnectionFailed(err.to_string()),
    }
}

#[async_trait]
impl Connector for TelegramConnector {
    async fn open(&self, credential: &SecretString) -> Result<Connection, SourceError> {
        let bot = self.build_bot(credential.expose_secret())?;

        let me = (|| {
            let bot = bot.clone();
            async move { bot.get_me().await }
        })
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(config::connect::min_delay())
                    .with_max_delay(config::connect::max_delay())
                    .with_max_times(config::connect::MAX_ATTEMPTS),
            )
            .when(|e: &RequestError| !classify(e).is_fatal())
            .notify(|e: &RequestError, after| {
                log::warn!("getMe failed ({}), retrying in {:?}", e, after);
            })
            .await
            .map_err(|e| classify(&e))?;

        let bot_username = me.user.username.clone();
        log::info!("Opened bot @{}", bot_username.as_deref().unwrap_or("<unnamed>"));

        Ok(Connection {
            source: Box::new(TelegramUpdateSource::new(bot.clone())),
            outbound: Arc::new(TelegramOutbound::new(bot)),
            bot_username,
        })
    }
}

/// `getUpdates` long polling for one bot.
///
/// Each request returns a batch; events are handed out one by one and the
/// offset confirms everything fetched on the next request.
pub struct TelegramUpdateSource {
    bot: Bot,
    next_offset: i32,
    /// Offset just past the last event returned to the caller
    delivered_offset: i32,
    buffer: VecDeque<(i32, InboundEvent)>,
    closed: bool,
}

impl TelegramUpdateSource {
    pub fn new(bot: Bot) -> Self {
        Self {
            bot,
            next_offset: 0,
            delivered_offset: 0,
            buffer: VecDeque::new(),
            closed: false,
        }
    }

    fn pop(&mut self) -> Option<InboundEvent> {
        let (offset, event) = self.buffer.pop_front()?;
        self.delivered_offset = offset;
        Some(event)
    }
}

#[async_trait]
impl UpdateSource for TelegramUpdateSource {
    async fn next_event(&mut self) -> Result<Option<InboundEvent>, SourceError> {
        if self.closed {
            return Err(SourceError::Closed);
        }
        if let Some(event) = self.pop() {
            return Ok(Some(event));
        }

        let updates = self
            .bot
            .get_updates()
            .offset(self.next_offset)
            .timeout(config::polling::TIMEOUT_SECS)
            .allowed_updates(vec![AllowedUpdate::Message, AllowedUpdate::CallbackQuery])
            .await
            .map_err(|e| classify(&e))?;

        for update in updates {
            let offset = update.id.as_offset();
            self.next_offset = offset;
            match convert_update(update) {
                Some(event) => self.buffer.push_back((offset, event)),
                None if self.buffer.is_empty() => self.delivered_offset = offset,
                None => {}
            }
        }

        Ok(self.pop())
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let dropped = self.buffer.len();
        self.buffer.clear();
        if dropped > 0 {
            log::info!("Closing update source with {} undelivered updates", dropped);
        }
        // Confirm what was handed out so a restart does not replay it.
        if self.delivered_offset > 0 {
            if let Err(e) = self.bot.get_updates().offset(self.delivered_offset).timeout(0).limit(1).await {
                log::debug!("Final offset confirmation failed: {}", e);
            }
        }
    }
}

fn sender_of(user: &User) -> Option<Sender> {
    Some(Sender {
        user_id: i64::try_from(user.id.0).ok()?,
        username: user.username.clone(),
        first_name: user.first_name.clone(),
    })
}

fn convert_update(update: Update) -> Option<InboundEvent> {
    match update.kind {
        UpdateKind::Message(msg) => convert_message(&msg),
        UpdateKind::CallbackQuery(query) => convert_callback(&query),
        _ => None,
    }
}

fn convert_message(msg: &Message) -> Option<InboundEvent> {
    let sender = sender_of(msg.from.as_ref()?)?;
    let mut attachments = Vec::new();
    // Telegram lists photo sizes smallest first
    if let Some(largest) = msg.photo().and_then(|sizes| sizes.last()) {
        attachments.push(Attachment::Photo {
            file_id: largest.file.id.0.clone(),
        });
    }
    if let Some(doc) = msg.document() {
        attachments.push(Attachment::Document {
            file_id: doc.file.id.0.clone(),
        });
    }
    let text = msg.text().or_else(|| msg.caption()).map(str::to_string);
    if text.is_none() && attachments.is_empty() {
        attachments.push(Attachment::Other);
    }

    Some(InboundEvent::Text(TextMessage {
        chat_id: msg.chat.id.0,
        sender,
        text,
        attachments,
    }))
}

fn convert_callback(query: &CallbackQuery) -> Option<InboundEvent> {
    let sender = sender_of(&query.from)?;
    let action_id = query.data.clone()?;
    let chat_id = query
        .message
        .as_ref()
        .map(|m| m.chat().id.0)
        .unwrap_or(sender.user_id);

    Some(InboundEvent::Callback(CallbackAction {
        callback_id: query.id.0.clone(),
        chat_id,
        sender,
        action_id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_credential_errors() {
        let invalid = RequestError::Api(ApiError::InvalidToken);
        assert!(matches!(classify(&invalid), SourceError::CredentialInvalid(_)));

        let other = RequestError::Api(ApiError::BotBlocked);
        assert!(matches!(classify(&other), SourceError::ConnectionFailed(_)));
    }
}
