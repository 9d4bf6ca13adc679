//! Client WebSocket schema: commands in, events out (spec §3, §6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type AgentId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Manager,
    Worker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Streaming,
    Terminated,
    StoppedOnRestart,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSpec {
    pub provider: String,
    pub model_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_level: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextUsage {
    pub used: u64,
    pub total: u64,
}

/// An agent's durable descriptor, as broadcast in `agents_snapshot`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDescriptor {
    pub agent_id: AgentId,
    pub manager_id: AgentId,
    pub role: Role,
    pub display_name: String,
    pub cwd: String,
    pub model: ModelSpec,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub session_file: String,
    pub status: AgentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_usage: Option<ContextUsage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Web,
    Slack,
    Telegram,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceContext {
    pub channel: ChannelKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Delivery {
    Auto,
    FollowUp,
    Steer,
}

impl Default for Delivery {
    fn default() -> Self {
        Self::Auto
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Attachment {
    Image { mime_type: String, data: String },
    Text { mime_type: String, text: String },
    Binary { mime_type: String, data: String },
}

/// An input queued for delivery to one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Input {
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_context: Option<SourceContext>,
    #[serde(default)]
    pub delivery: Delivery,
    pub agent_id: AgentId,
}

impl Input {
    /// Boundary behavior (spec §8): empty text with no attachments is
    /// rejected silently rather than as an error.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.text.is_empty() || !self.attachments.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageSource {
    UserInput,
    SpeakToUser,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    MessageStart,
    MessageEnd,
    ToolExecutionStart,
    ToolExecutionUpdate,
    ToolExecutionEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMessageSource {
    UserToAgent,
    AgentToAgent,
}

/// Tagged union of conversation events (spec §3). Every variant carries
/// `agentId`/`timestamp`/`seq`, flattened via `#[serde(flatten)]` on the
/// wrapper envelope rather than duplicated per-arm.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationEventBody {
    ConversationMessage {
        role: MessageRole,
        text: String,
        source: MessageSource,
        #[serde(skip_serializing_if = "Option::is_none")]
        source_context: Option<SourceContext>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attachments: Option<Vec<Attachment>>,
    },
    ConversationLog {
        /// Always `"runtime_log"`; kept as a field (not folded into the tag)
        /// to match the wire shape the UI already expects.
        source: String,
        kind: LogKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_call_id: Option<String>,
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    AgentMessage {
        from_agent_id: AgentId,
        to_agent_id: AgentId,
        source: AgentMessageSource,
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        requested_delivery: Option<Delivery>,
        #[serde(skip_serializing_if = "Option::is_none")]
        accepted_mode: Option<Delivery>,
    },
    AgentToolCall {
        actor_agent_id: AgentId,
        kind: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_call_id: Option<String>,
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

impl ConversationEventBody {
    /// Cancellation-marker check used by §3's `end` invariant: an `end`
    /// payload containing `[aborted]` or `cancel` (case-insensitive)
    /// denotes cancellation rather than success.
    #[must_use]
    pub fn is_cancellation_marker(text: &str) -> bool {
        let lower = text.to_lowercase();
        lower.contains("[aborted]") || lower.contains("cancel")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEvent {
    pub agent_id: AgentId,
    pub timestamp: DateTime<Utc>,
    /// Monotonic per-agent sequence number (ambient addition, §3 supplement).
    pub seq: u64,
    #[serde(flatten)]
    pub body: ConversationEventBody,
}

/// Client → server commands.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    Subscribe {
        #[serde(default)]
        agent_id: Option<AgentId>,
    },
    UserMessage {
        text: String,
        #[serde(default)]
        agent_id: Option<AgentId>,
        #[serde(default)]
        delivery: Option<Delivery>,
        #[serde(default)]
        attachments: Vec<Attachment>,
    },
    KillAgent {
        agent_id: AgentId,
    },
    CreateManager {
        name: String,
        cwd: String,
        model: ModelSpec,
        #[serde(default)]
        request_id: Option<String>,
    },
    DeleteManager {
        manager_id: AgentId,
        #[serde(default)]
        request_id: Option<String>,
    },
    StopAllAgents {
        manager_id: AgentId,
        #[serde(default)]
        request_id: Option<String>,
    },
    ListDirectories {
        #[serde(default)]
        path: Option<String>,
        #[serde(default)]
        request_id: Option<String>,
    },
    ValidateDirectory {
        path: String,
        #[serde(default)]
        request_id: Option<String>,
    },
    PickDirectory {
        #[serde(default)]
        default_path: Option<String>,
        #[serde(default)]
        request_id: Option<String>,
    },
    Ping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub name: String,
    pub is_dir: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationStatus {
    Disabled,
    Connecting,
    Connected,
    Error,
}

/// Server → client events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[allow(clippy::large_enum_variant)]
pub enum ServerEvent {
    Ready {
        subscribed_agent_id: Option<AgentId>,
    },
    AgentsSnapshot {
        agents: Vec<AgentDescriptor>,
    },
    AgentStatus {
        agent_id: AgentId,
        status: AgentStatus,
        pending_count: usize,
    },
    ConversationHistory {
        agent_id: AgentId,
        conversation: Vec<ConversationEvent>,
        activity: Vec<ConversationEvent>,
    },
    #[serde(untagged)]
    Conversation(ConversationEvent),
    ConversationReset {
        agent_id: AgentId,
        reason: String,
    },
    ManagerCreated {
        agent: AgentDescriptor,
        request_id: Option<String>,
    },
    ManagerDeleted {
        manager_id: AgentId,
        request_id: Option<String>,
    },
    StopAllAgentsResult {
        manager_id: AgentId,
        stopped_workers: Vec<AgentId>,
        manager_stopped: bool,
        request_id: Option<String>,
    },
    DirectoriesListed {
        path: String,
        entries: Vec<DirectoryEntry>,
        request_id: Option<String>,
    },
    DirectoryValidated {
        path: String,
        valid: bool,
        request_id: Option<String>,
    },
    DirectoryPicked {
        path: Option<String>,
        request_id: Option<String>,
    },
    SlackStatus {
        status: IntegrationStatus,
    },
    TelegramStatus {
        status: IntegrationStatus,
    },
    Error {
        code: &'static str,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_with_attachment_is_valid() {
        let input = Input {
            text: String::new(),
            attachments: vec![Attachment::Text {
                mime_type: "text/plain".into(),
                text: "hi".into(),
            }],
            source_context: None,
            delivery: Delivery::Auto,
            agent_id: "a1".into(),
        };
        assert!(input.is_valid());
    }

    #[test]
    fn fully_empty_input_is_invalid() {
        let input = Input {
            text: String::new(),
            attachments: vec![],
            source_context: None,
            delivery: Delivery::Auto,
            agent_id: "a1".into(),
        };
        assert!(!input.is_valid());
    }

    #[test]
    fn cancellation_marker_is_case_insensitive() {
        assert!(ConversationEventBody::is_cancellation_marker("[ABORTED]"));
        assert!(ConversationEventBody::is_cancellation_marker("Cancelled by user"));
        assert!(!ConversationEventBody::is_cancellation_marker("done"));
    }

    #[test]
    fn client_command_parses_user_message() {
        let json = r#"{"type":"user_message","text":"hi","agentId":"a1"}"#;
        let cmd: ClientCommand = serde_json::from_str(json).unwrap();
        match cmd {
            ClientCommand::UserMessage { text, agent_id, .. } => {
                assert_eq!(text, "hi");
                assert_eq!(agent_id.as_deref(), Some("a1"));
            }
            _ => panic!("wrong variant"),
        }
    }
}
