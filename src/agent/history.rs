//! Bounded per-agent conversation history with replay and reset (spec §4.3).
//!
//! Owned exclusively by the SwarmManager actor task; no locking is needed
//! because only that task ever touches it (spec §5: "no shared mutable
//! state outside that actor").

use std::collections::{HashMap, VecDeque};
use std::io::Write;

use crate::wire::{AgentId, ConversationEvent, ConversationEventBody};

struct AgentHistory {
    capacity: usize,
    events: VecDeque<ConversationEvent>,
    next_seq: u64,
    session_file: Option<std::path::PathBuf>,
}

impl AgentHistory {
    fn new(capacity: usize, session_file: Option<std::path::PathBuf>) -> Self {
        Self {
            capacity,
            events: VecDeque::new(),
            next_seq: 0,
            session_file,
        }
    }

    fn push(&mut self, mut event: ConversationEvent) -> ConversationEvent {
        event.seq = self.next_seq;
        self.next_seq += 1;
        self.persist(&event);
        self.events.push_back(event.clone());
        while self.events.len() > self.capacity {
            self.events.pop_front();
        }
        event
    }

    fn persist(&self, event: &ConversationEvent) {
        let Some(path) = &self.session_file else {
            return;
        };
        let Ok(line) = serde_json::to_string(event) else {
            return;
        };
        if let Ok(mut file) = std::fs::OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{line}");
        }
    }
}

/// Append-only per-agent ring buffer, capacity N >= 2000 (spec §4.3).
pub struct HistoryStore {
    default_capacity: usize,
    by_agent: HashMap<AgentId, AgentHistory>,
}

impl HistoryStore {
    #[must_use]
    pub fn new(default_capacity: usize) -> Self {
        Self {
            default_capacity,
            by_agent: HashMap::new(),
        }
    }

    pub fn register(&mut self, agent_id: &AgentId, session_file: Option<std::path::PathBuf>) {
        self.by_agent.entry(agent_id.clone()).or_insert_with(|| {
            AgentHistory::new(self.default_capacity, session_file)
        });
    }

    /// Like [`Self::register`], but preloads the in-memory ring buffer from
    /// an existing transcript file (restart-on-boot, spec §4.4): the first
    /// line is the metadata header written at agent creation and is
    /// skipped, the rest are replayed in order up to `default_capacity`.
    pub fn register_from_disk(&mut self, agent_id: &AgentId, session_file: std::path::PathBuf) {
        let mut history = AgentHistory::new(self.default_capacity, Some(session_file.clone()));
        if let Ok(contents) = std::fs::read_to_string(&session_file) {
            let mut max_seq = None;
            for line in contents.lines().skip(1) {
                let Ok(event) = serde_json::from_str::<ConversationEvent>(line) else {
                    continue;
                };
                max_seq = Some(event.seq);
                history.events.push_back(event);
                while history.events.len() > history.capacity {
                    history.events.pop_front();
                }
            }
            if let Some(seq) = max_seq {
                history.next_seq = seq + 1;
            }
        }
        self.by_agent.insert(agent_id.clone(), history);
    }

    /// Append an event, assigning it the next sequence number for this agent.
    pub fn append(&mut self, agent_id: &AgentId, event: ConversationEvent) -> ConversationEvent {
        let history = self
            .by_agent
            .entry(agent_id.clone())
            .or_insert_with(|| AgentHistory::new(self.default_capacity, None));
        history.push(event)
    }

    /// Full replay for `subscribe`/`switchTo`: the conversation projection
    /// (`conversation_message` + `conversation_log`) and the activity
    /// projection (`agent_message` + `agent_tool_call`), per spec §3.
    #[must_use]
    pub fn replay(&self, agent_id: &AgentId) -> (Vec<ConversationEvent>, Vec<ConversationEvent>) {
        let Some(history) = self.by_agent.get(agent_id) else {
            return (Vec::new(), Vec::new());
        };
        let mut conversation = Vec::new();
        let mut activity = Vec::new();
        for event in &history.events {
            match &event.body {
                ConversationEventBody::ConversationMessage { .. }
                | ConversationEventBody::ConversationLog { .. } => conversation.push(event.clone()),
                ConversationEventBody::AgentMessage { .. }
                | ConversationEventBody::AgentToolCall { .. } => activity.push(event.clone()),
            }
        }
        (conversation, activity)
    }

    /// Clears the buffer for `agent_id`. Caller (SwarmManager) is
    /// responsible for cancelling the in-flight input first when
    /// `reason == "user_new_command"` (spec §4.3).
    pub fn reset(&mut self, agent_id: &AgentId) {
        if let Some(history) = self.by_agent.get_mut(agent_id) {
            history.events.clear();
        }
    }

    pub fn remove(&mut self, agent_id: &AgentId) {
        self.by_agent.remove(agent_id);
    }

    #[must_use]
    pub fn len(&self, agent_id: &AgentId) -> usize {
        self.by_agent.get(agent_id).map_or(0, |h| h.events.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{LogKind, MessageRole, MessageSource};
    use chrono::Utc;

    fn log_event(agent_id: &str, kind: LogKind) -> ConversationEvent {
        ConversationEvent {
            agent_id: agent_id.to_string(),
            timestamp: Utc::now(),
            seq: 0,
            body: ConversationEventBody::ConversationLog {
                source: "runtime_log".into(),
                kind,
                tool_name: None,
                tool_call_id: None,
                text: String::new(),
                is_error: None,
            },
        }
    }

    fn message_event(agent_id: &str, text: &str) -> ConversationEvent {
        ConversationEvent {
            agent_id: agent_id.to_string(),
            timestamp: Utc::now(),
            seq: 0,
            body: ConversationEventBody::ConversationMessage {
                role: MessageRole::User,
                text: text.into(),
                source: MessageSource::UserInput,
                source_context: None,
                attachments: None,
            },
        }
    }

    #[test]
    fn bounded_memory_drops_oldest() {
        let mut store = HistoryStore::new(3);
        let agent = "a1".to_string();
        for i in 0..10 {
            store.append(&agent, message_event(&agent, &i.to_string()));
        }
        assert_eq!(store.len(&agent), 3);
    }

    #[test]
    fn replay_splits_conversation_and_activity() {
        let mut store = HistoryStore::new(10);
        let agent = "a1".to_string();
        store.append(&agent, message_event(&agent, "hi"));
        store.append(&agent, log_event(&agent, LogKind::MessageStart));
        let (conversation, activity) = store.replay(&agent);
        assert_eq!(conversation.len(), 2);
        assert!(activity.is_empty());
    }

    #[test]
    fn sequence_numbers_are_monotonic() {
        let mut store = HistoryStore::new(10);
        let agent = "a1".to_string();
        let e0 = store.append(&agent, message_event(&agent, "a"));
        let e1 = store.append(&agent, message_event(&agent, "b"));
        assert_eq!(e0.seq, 0);
        assert_eq!(e1.seq, 1);
    }

    #[test]
    fn reset_clears_the_buffer() {
        let mut store = HistoryStore::new(10);
        let agent = "a1".to_string();
        store.append(&agent, message_event(&agent, "hi"));
        store.reset(&agent);
        assert_eq!(store.len(&agent), 0);
    }
}
