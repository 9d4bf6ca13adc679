//! Typed daemon configuration, loaded from `~/.middleman/config.json` and
//! overridden by environment variables, following the
//! `#[serde(rename_all = "camelCase", default)]` convention used throughout
//! the OxiBot example pack's `config/schema.rs`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_history_capacity() -> usize {
    2000
}
fn default_subscriber_queue_capacity() -> usize {
    1000
}
fn default_graceful_stop_secs() -> u64 {
    5
}
fn default_steer_cancel_secs() -> u64 {
    15
}
fn default_rpc_timeout_secs() -> u64 {
    300
}
fn default_telegram_poll_secs() -> u64 {
    25
}
fn default_ws_reconnect_backoff_ms() -> u64 {
    1200
}
fn default_port() -> u16 {
    8700
}
fn default_max_attachment_bytes() -> u64 {
    10 * 1024 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub port: u16,
    pub history_capacity: usize,
    pub subscriber_queue_capacity: usize,
    pub timeouts: Timeouts,
    pub slack: SlackConfig,
    pub telegram: TelegramConfig,
    pub rpc: RpcConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            history_capacity: default_history_capacity(),
            subscriber_queue_capacity: default_subscriber_queue_capacity(),
            timeouts: Timeouts::default(),
            slack: SlackConfig::default(),
            telegram: TelegramConfig::default(),
            rpc: RpcConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Timeouts {
    pub graceful_stop_secs: u64,
    pub steer_cancel_secs: u64,
    pub rpc_timeout_secs: u64,
    pub telegram_poll_secs: u64,
    pub ws_reconnect_backoff_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            graceful_stop_secs: default_graceful_stop_secs(),
            steer_cancel_secs: default_steer_cancel_secs(),
            rpc_timeout_secs: default_rpc_timeout_secs(),
            telegram_poll_secs: default_telegram_poll_secs(),
            ws_reconnect_backoff_ms: default_ws_reconnect_backoff_ms(),
        }
    }
}

impl Timeouts {
    #[must_use]
    pub fn graceful_stop(&self) -> Duration {
        Duration::from_secs(self.graceful_stop_secs)
    }

    #[must_use]
    pub fn steer_cancel(&self) -> Duration {
        Duration::from_secs(self.steer_cancel_secs)
    }

    #[must_use]
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    #[must_use]
    pub fn telegram_poll(&self) -> Duration {
        Duration::from_secs(self.telegram_poll_secs)
    }

    #[must_use]
    pub fn ws_reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.ws_reconnect_backoff_ms)
    }
}

/// Attachment download limits shared by Slack/Telegram, matching OxiBot's
/// per-profile `allowImages`/`allowText`/`allowBinary`/`maxFileBytes` knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttachmentPolicy {
    pub allow_images: bool,
    pub allow_text: bool,
    pub allow_binary: bool,
    pub max_file_bytes: u64,
}

impl Default for AttachmentPolicy {
    fn default() -> Self {
        Self {
            allow_images: true,
            allow_text: true,
            allow_binary: false,
            max_file_bytes: default_max_attachment_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SlackConfig {
    pub enabled: bool,
    pub app_token: String,
    pub bot_token: String,
    pub manager_id: String,
    pub respond_in_thread: bool,
    pub reply_broadcast: bool,
    pub attachments: AttachmentPolicy,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            app_token: String::new(),
            bot_token: String::new(),
            manager_id: String::new(),
            respond_in_thread: true,
            reply_broadcast: false,
            attachments: AttachmentPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelegramConfig {
    pub enabled: bool,
    pub bot_token: String,
    pub manager_id: String,
    /// Empty = allow all.
    pub allowed_user_ids: Vec<String>,
    pub reply_to_inbound_message_by_default: bool,
    pub attachments: AttachmentPolicy,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: String::new(),
            manager_id: String::new(),
            allowed_user_ids: Vec::new(),
            reply_to_inbound_message_by_default: true,
            attachments: AttachmentPolicy::default(),
        }
    }
}

/// Spec §9 REDESIGN FLAGS: the legacy reject-by-code-prefix fallback is
/// preserved only behind this compatibility flag, default off.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RpcConfig {
    pub compat_reject_by_code_prefix: bool,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            compat_reject_by_code_prefix: false,
        }
    }
}

impl Config {
    /// Load from `path` if present, otherwise defaults; environment
    /// variables always win, matching the teacher's `PHOENIX_PORT` /
    /// `PHOENIX_DB_PATH` precedence in `main.rs`.
    pub fn load(path: &std::path::Path) -> crate::error::Result<Self> {
        let mut config = if path.exists() {
            let bytes = std::fs::read(path)?;
            serde_json::from_slice(&bytes)?
        } else {
            Self::default()
        };

        if let Ok(port) = std::env::var("MIDDLEMAN_PORT") {
            if let Ok(port) = port.parse() {
                config.port = port;
            }
        }
        if let Ok(token) = std::env::var("MIDDLEMAN_SLACK_BOT_TOKEN") {
            config.slack.bot_token = token;
        }
        if let Ok(token) = std::env::var("MIDDLEMAN_SLACK_APP_TOKEN") {
            config.slack.app_token = token;
        }
        if let Ok(token) = std::env::var("MIDDLEMAN_TELEGRAM_BOT_TOKEN") {
            config.telegram.bot_token = token;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sensible_timeouts() {
        let config = Config::default();
        assert_eq!(config.timeouts.rpc_timeout_secs, 300);
        assert_eq!(config.timeouts.steer_cancel_secs, 15);
        assert!(!config.rpc.compat_reject_by_code_prefix);
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let json = r#"{"port": 9000}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.history_capacity, 2000);
        assert!(!config.slack.enabled);
    }

    #[test]
    fn camel_case_round_trip() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("historyCapacity"));
        assert!(json.contains("allowImages"));
        let round_tripped: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(round_tripped.port, config.port);
    }
}
