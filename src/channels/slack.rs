//! Slack socket-mode adapter (spec §4.6). Grounded on OxiBot's
//! `tokio-tungstenite`-based gateway channels for the envelope
//! ack/reconnect shape, and on OxiBot's `oxibot-channels/src/telegram.rs`
//! allow-list/attachment-policy pattern for the per-profile limits.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use crate::config::{AttachmentPolicy, SlackConfig};
use crate::error::{MiddlemanError, Result};
use crate::wire::{AgentId, ChannelKind, SourceContext};

use super::base::Channel;
use super::bus::{InboundMessage, MessageBus, OutboundMessage};

pub struct SlackChannel {
    config: SlackConfig,
    manager_id: AgentId,
    bus: Arc<MessageBus>,
    http: reqwest::Client,
}

impl SlackChannel {
    #[must_use]
    pub fn new(config: SlackConfig, bus: Arc<MessageBus>) -> Self {
        let manager_id = config.manager_id.clone();
        Self {
            config,
            manager_id,
            bus,
            http: reqwest::Client::new(),
        }
    }

    async fn open_socket_url(&self) -> Result<String> {
        let resp: Value = self
            .http
            .post("https://slack.com/api/apps.connections.open")
            .bearer_auth(&self.config.app_token)
            .send()
            .await
            .map_err(|e| MiddlemanError::IntegrationTransportError(e.to_string()))?
            .json()
            .await
            .map_err(|e| MiddlemanError::IntegrationTransportError(e.to_string()))?;

        if resp.get("ok").and_then(Value::as_bool) != Some(true) {
            return Err(MiddlemanError::IntegrationAuthFailed(
                resp.get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("apps.connections.open failed")
                    .to_string(),
            ));
        }
        resp.get("url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| MiddlemanError::IntegrationTransportError("no socket url in response".into()))
    }

    async fn handle_envelope(&self, envelope: &Value) {
        let Some(payload) = envelope.get("payload") else {
            return;
        };
        let Some(event) = payload.get("event") else {
            return;
        };
        if event.get("type").and_then(Value::as_str) != Some("message") {
            return;
        }
        if event.get("bot_id").is_some() {
            return; // never react to our own/other bots' posts
        }
        let Some(text) = event.get("text").and_then(Value::as_str) else {
            return;
        };
        let Some(channel_id) = event.get("channel").and_then(Value::as_str) else {
            return;
        };
        let user_id = event.get("user").and_then(Value::as_str).map(str::to_string);
        let thread_ts = event.get("thread_ts").and_then(Value::as_str).map(str::to_string);
        let channel_type = if channel_id.starts_with('D') { "dm" } else { "channel" };

        if channel_type == "channel" && !self.config.respond_in_thread && thread_ts.is_none() {
            return; // a bare channel mention outside a thread we're not configured to join
        }

        let source_context = SourceContext {
            channel: ChannelKind::Slack,
            channel_id: Some(channel_id.to_string()),
            channel_type: Some(channel_type.to_string()),
            user_id,
            thread_ts,
        };

        let input = crate::wire::Input {
            text: text.to_string(),
            attachments: self.download_attachments(event).await,
            source_context: Some(source_context),
            delivery: crate::wire::Delivery::Auto,
            agent_id: self.manager_id.clone(),
        };

        self.bus.publish_inbound(InboundMessage { input }).await;
    }

    /// Filters `event`'s `files` by the attachment policy, then downloads
    /// each surviving file from its `url_private` (Slack requires the bot
    /// token on this request same as any Web API call, just as a bearer
    /// header rather than a query param). A file that fails to download is
    /// dropped and logged rather than failing the whole message.
    async fn download_attachments(&self, event: &Value) -> Vec<crate::wire::Attachment> {
        let Some(files) = event.get("files").and_then(Value::as_array) else {
            return Vec::new();
        };
        let policy = &self.config.attachments;
        let mut attachments = Vec::new();
        for f in files {
            let Some(mime_type) = f.get("mimetype").and_then(Value::as_str).map(str::to_string) else {
                continue;
            };
            let size = f.get("size").and_then(Value::as_u64).unwrap_or(0);
            if size > policy.max_file_bytes {
                continue;
            }
            let is_image = mime_type.starts_with("image/");
            let is_text = mime_type.starts_with("text/");
            let allowed = if is_image {
                policy.allow_images
            } else if is_text {
                policy.allow_text
            } else {
                policy.allow_binary
            };
            if !allowed {
                continue;
            }
            let Some(url) = f.get("url_private").and_then(Value::as_str) else {
                continue;
            };
            let bytes = match self.fetch_file(url).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(error = %e, "failed to download slack attachment");
                    continue;
                }
            };
            attachments.push(if is_image {
                crate::wire::Attachment::Image {
                    mime_type,
                    data: BASE64.encode(&bytes),
                }
            } else if is_text {
                crate::wire::Attachment::Text {
                    mime_type,
                    text: String::from_utf8_lossy(&bytes).into_owned(),
                }
            } else {
                crate::wire::Attachment::Binary {
                    mime_type,
                    data: BASE64.encode(&bytes),
                }
            });
        }
        attachments
    }

    async fn fetch_file(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.config.bot_token)
            .send()
            .await
            .map_err(|e| MiddlemanError::IntegrationTransportError(e.to_string()))?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| MiddlemanError::IntegrationTransportError(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl Channel for SlackChannel {
    fn name(&self) -> &'static str {
        "slack"
    }

    async fn start(&self) -> Result<()> {
        let url = self.open_socket_url().await?;
        let (ws_stream, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| MiddlemanError::IntegrationTransportError(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();
        info!("slack socket-mode connection established");

        while let Some(message) = read.next().await {
            let message = match message {
                Ok(m) => m,
                Err(e) => {
                    warn!(error = %e, "slack socket read error");
                    break;
                }
            };
            let WsMessage::Text(text) = message else {
                continue;
            };
            let Ok(envelope) = serde_json::from_str::<Value>(&text) else {
                continue;
            };

            if let Some(envelope_id) = envelope.get("envelope_id").and_then(Value::as_str) {
                let ack = serde_json::json!({ "envelope_id": envelope_id });
                if let Err(e) = write.send(WsMessage::Text(ack.to_string().into())).await {
                    warn!(error = %e, "failed to ack slack envelope");
                }
            }

            match envelope.get("type").and_then(Value::as_str) {
                Some("events_api") => self.handle_envelope(&envelope).await,
                Some("disconnect") => {
                    debug!("slack requested reconnect");
                    break;
                }
                _ => {}
            }
        }

        Err(MiddlemanError::IntegrationTransportError(
            "slack socket-mode connection closed".into(),
        ))
    }

    async fn send(&self, msg: &OutboundMessage) -> Result<()> {
        let Some(channel_id) = &msg.source_context.channel_id else {
            return Ok(());
        };
        let mut body = serde_json::json!({
            "channel": channel_id,
            "text": msg.text,
            "reply_broadcast": self.config.reply_broadcast,
        });
        if self.config.respond_in_thread {
            if let Some(thread_ts) = &msg.source_context.thread_ts {
                body["thread_ts"] = Value::String(thread_ts.clone());
            }
        }

        let resp: Value = self
            .http
            .post("https://slack.com/api/chat.postMessage")
            .bearer_auth(&self.config.bot_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| MiddlemanError::IntegrationTransportError(e.to_string()))?
            .json()
            .await
            .map_err(|e| MiddlemanError::IntegrationTransportError(e.to_string()))?;

        if resp.get("ok").and_then(Value::as_bool) != Some(true) {
            return Err(MiddlemanError::IntegrationTransportError(format!(
                "chat.postMessage failed: {resp}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dm_channel_is_classified_as_dm() {
        let channel_id = "D12345";
        let channel_type = if channel_id.starts_with('D') { "dm" } else { "channel" };
        assert_eq!(channel_type, "dm");
    }

    fn test_channel(policy: AttachmentPolicy) -> SlackChannel {
        SlackChannel::new(
            SlackConfig {
                enabled: true,
                app_token: "xapp-test".into(),
                bot_token: "xoxb-test".into(),
                manager_id: "m1".into(),
                respond_in_thread: true,
                reply_broadcast: false,
                attachments: policy,
            },
            Arc::new(MessageBus::new(16)),
        )
    }

    #[tokio::test]
    async fn oversized_image_is_dropped() {
        let channel = test_channel(AttachmentPolicy {
            allow_images: true,
            allow_text: true,
            allow_binary: false,
            max_file_bytes: 10,
        });
        let event = json!({ "files": [{ "mimetype": "image/png", "size": 1000, "url_private": "https://example.invalid/f" }] });
        assert!(channel.download_attachments(&event).await.is_empty());
    }

    #[tokio::test]
    async fn disallowed_binary_is_dropped() {
        let channel = test_channel(AttachmentPolicy {
            allow_images: true,
            allow_text: true,
            allow_binary: false,
            max_file_bytes: 1_000_000,
        });
        let event = json!({ "files": [{ "mimetype": "application/octet-stream", "size": 10, "url_private": "https://example.invalid/f" }] });
        assert!(channel.download_attachments(&event).await.is_empty());
    }

    #[tokio::test]
    async fn file_missing_url_private_is_dropped() {
        let channel = test_channel(AttachmentPolicy {
            allow_images: true,
            allow_text: true,
            allow_binary: true,
            max_file_bytes: 1_000_000,
        });
        let event = json!({ "files": [{ "mimetype": "text/plain", "size": 10 }] });
        assert!(channel.download_attachments(&event).await.is_empty());
    }
}
