//! Telegram long-polling adapter (spec §4.6), a direct port of OxiBot's
//! `oxibot-channels/src/telegram.rs` allow-list/content-extraction shape
//! onto `teloxide`'s `Bot` + `repl`-style update loop instead of nanobot's
//! `python-telegram-bot` polling.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use teloxide::prelude::*;
use teloxide::types::{MediaKind, MessageId, MessageKind};
use tracing::warn;

use crate::config::TelegramConfig;
use crate::error::{MiddlemanError, Result};
use crate::wire::{AgentId, Attachment, ChannelKind, Delivery, Input, SourceContext};

use super::base::Channel;
use super::bus::{InboundMessage, MessageBus, OutboundMessage};

pub struct TelegramChannel {
    config: TelegramConfig,
    manager_id: AgentId,
    bus: Arc<MessageBus>,
    bot: Bot,
    http: reqwest::Client,
    poll_secs: u32,
}

impl TelegramChannel {
    #[must_use]
    pub fn new(config: TelegramConfig, bus: Arc<MessageBus>, poll_secs: u64) -> Self {
        let bot = Bot::new(config.bot_token.clone());
        let manager_id = config.manager_id.clone();
        let poll_secs = u32::try_from(poll_secs).unwrap_or(u32::MAX);
        Self { config, manager_id, bus, bot, http: reqwest::Client::new(), poll_secs }
    }

    /// Empty allow-list = allow everyone (matches OxiBot's `is_allowed`).
    fn is_allowed(&self, user_id: &str) -> bool {
        self.config.allowed_user_ids.is_empty() || self.config.allowed_user_ids.iter().any(|u| u == user_id)
    }

    async fn handle_message(&self, message: &Message) {
        let Some(from) = message.from.as_ref() else {
            return;
        };
        let user_id = from.id.0.to_string();
        if !self.is_allowed(&user_id) {
            warn!(user = %user_id, "telegram message from unauthorized user, ignoring");
            return;
        }

        let text = match &message.kind {
            MessageKind::Common(common) => match &common.media_kind {
                MediaKind::Text(text_msg) => text_msg.text.clone(),
                _ => String::new(),
            },
            _ => String::new(),
        };
        if text.is_empty() {
            return;
        }

        let attachments = self.download_attachments(message).await;

        let input = Input {
            text,
            attachments,
            source_context: Some(SourceContext {
                channel: ChannelKind::Telegram,
                channel_id: Some(message.chat.id.0.to_string()),
                channel_type: None,
                user_id: Some(user_id),
                // Reused as the inbound message id so `send()` can thread
                // the reply via `reply_to_inbound_message_by_default`.
                thread_ts: Some(message.id.0.to_string()),
            }),
            delivery: Delivery::Auto,
            agent_id: self.manager_id.clone(),
        };

        self.bus.publish_inbound(InboundMessage { input }).await;
    }

    /// Downloads photo/document attachments via `teloxide`'s file API,
    /// filtered by the same allow/size policy Slack applies.
    async fn download_attachments(&self, message: &Message) -> Vec<Attachment> {
        let MessageKind::Common(common) = &message.kind else {
            return Vec::new();
        };
        let (file_id, mime_type, size, is_image) = match &common.media_kind {
            MediaKind::Photo(photo) => {
                let Some(largest) = photo.photo.iter().max_by_key(|p| p.width * p.height) else {
                    return Vec::new();
                };
                (largest.file.id.clone(), "image/jpeg".to_string(), largest.file.size, true)
            }
            MediaKind::Document(doc) => {
                let mime_type = doc
                    .document
                    .mime_type
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                (doc.document.file.id.clone(), mime_type, doc.document.file.size, false)
            }
            _ => return Vec::new(),
        };

        let policy = &self.config.attachments;
        let allowed = if is_image { policy.allow_images } else { policy.allow_binary };
        if !allowed || u64::from(size) > policy.max_file_bytes {
            return Vec::new();
        }

        let file = match self.bot.get_file(file_id).await {
            Ok(file) => file,
            Err(e) => {
                warn!(error = %e, "failed to resolve telegram file metadata");
                return Vec::new();
            }
        };
        let url = format!("https://api.telegram.org/file/bot{}/{}", self.config.bot_token, file.path);
        let bytes = match self.http.get(&url).send().await.and_then(|r| r.error_for_status()) {
            Ok(resp) => match resp.bytes().await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(error = %e, "failed to read telegram attachment body");
                    return Vec::new();
                }
            },
            Err(e) => {
                warn!(error = %e, "failed to download telegram attachment");
                return Vec::new();
            }
        };

        if is_image {
            vec![Attachment::Image { mime_type, data: BASE64.encode(&bytes) }]
        } else {
            vec![Attachment::Binary { mime_type, data: BASE64.encode(&bytes) }]
        }
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn start(&self) -> Result<()> {
        let mut offset = 0i32;
        loop {
            let updates = self
                .bot
                .get_updates()
                .offset(offset)
                .timeout(self.poll_secs)
                .await
                .map_err(|e| MiddlemanError::IntegrationTransportError(e.to_string()))?;

            for update in updates {
                offset = update.id.0 as i32 + 1;
                if let teloxide::types::UpdateKind::Message(message) = update.kind {
                    self.handle_message(&message).await;
                }
            }
        }
    }

    async fn send(&self, msg: &OutboundMessage) -> Result<()> {
        let Some(chat_id) = &msg.source_context.channel_id else {
            return Ok(());
        };
        let Ok(chat_id) = chat_id.parse::<i64>() else {
            return Err(MiddlemanError::IntegrationTransportError(format!(
                "invalid telegram chat id: {chat_id}"
            )));
        };
        let reply_to = resolve_reply_to(
            self.config.reply_to_inbound_message_by_default,
            msg.source_context.thread_ts.as_deref(),
        );

        let request = self.bot.send_message(ChatId(chat_id), &msg.text);
        match reply_to {
            Some(id) => request.reply_to_message_id(MessageId(id)).await,
            None => request.await,
        }
        .map_err(|e| MiddlemanError::IntegrationTransportError(e.to_string()))?;
        Ok(())
    }
}

/// The inbound message id is stashed in `sourceContext.threadTs` (the same
/// field Slack uses for its thread timestamp); resolve it back into a
/// `reply_to_message_id` only when the config opts into reply-threading.
fn resolve_reply_to(reply_by_default: bool, thread_ts: Option<&str>) -> Option<i32> {
    if !reply_by_default {
        return None;
    }
    thread_ts.and_then(|id| id.parse::<i32>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(allowed: Vec<String>) -> TelegramConfig {
        TelegramConfig {
            enabled: true,
            bot_token: "test-token".into(),
            manager_id: "m1".into(),
            allowed_user_ids: allowed,
            reply_to_inbound_message_by_default: true,
            attachments: Default::default(),
        }
    }

    #[tokio::test]
    async fn empty_allow_list_allows_everyone() {
        let bus = Arc::new(MessageBus::new(4));
        let channel = TelegramChannel::new(config(vec![]), bus, 25);
        assert!(channel.is_allowed("12345"));
    }

    #[tokio::test]
    async fn non_empty_allow_list_rejects_unknown_user() {
        let bus = Arc::new(MessageBus::new(4));
        let channel = TelegramChannel::new(config(vec!["999".into()]), bus, 25);
        assert!(!channel.is_allowed("12345"));
        assert!(channel.is_allowed("999"));
    }

    #[test]
    fn reply_threading_off_by_default_flag() {
        assert_eq!(resolve_reply_to(false, Some("42")), None);
    }

    #[test]
    fn reply_threading_resolves_message_id_when_enabled() {
        assert_eq!(resolve_reply_to(true, Some("42")), Some(42));
    }

    #[test]
    fn reply_threading_with_no_inbound_context_is_none() {
        assert_eq!(resolve_reply_to(true, None), None);
    }
}
