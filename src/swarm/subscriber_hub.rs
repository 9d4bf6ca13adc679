//! SubscriberHub: fan-out with per-subscriber bounded queues, `switchTo`,
//! and reconnect-replay (spec §4.5).
//!
//! Generalizes the teacher's shared `broadcast::channel` fan-out
//! (`runtime/mod.rs`) to one bounded queue per subscriber, because the
//! spec's drop-oldest-and-synthesize-throttle policy cannot be expressed
//! through `broadcast`'s receiver-side lag counter.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::wire::{AgentId, ConversationEvent, ServerEvent};

fn throttle_notice() -> ServerEvent {
    ServerEvent::Conversation(ConversationEvent {
        agent_id: String::new(),
        timestamp: chrono::Utc::now(),
        seq: 0,
        body: crate::wire::ConversationEventBody::ConversationMessage {
            role: crate::wire::MessageRole::System,
            text: "event stream throttled".into(),
            source: crate::wire::MessageSource::System,
            source_context: None,
            attachments: None,
        },
    })
}

/// Unbounded `snapshot` entries (history snapshots, RPC replies) are kept in
/// a separate deque from the bounded `overflow` ring so that `push_bounded`'s
/// eviction can never pop one — spec §4.5's "history snapshots are never
/// dropped" otherwise races `switch_to`'s own push against a concurrent
/// overflow (a subscriber that never drains in between the two).
struct SubscriberQueue {
    capacity: usize,
    snapshot: VecDeque<ServerEvent>,
    overflow: VecDeque<ServerEvent>,
    throttled: bool,
}

impl SubscriberQueue {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            snapshot: VecDeque::new(),
            overflow: VecDeque::new(),
            throttled: false,
        }
    }

    fn push_bounded(&mut self, event: ServerEvent) {
        if self.overflow.len() >= self.capacity {
            self.overflow.pop_front();
            if !self.throttled {
                self.overflow.push_back(throttle_notice());
                self.throttled = true;
            }
        }
        self.overflow.push_back(event);
    }

    /// History snapshots are never dropped (spec §4.5).
    fn push_unbounded(&mut self, event: ServerEvent) {
        self.snapshot.push_back(event);
    }

    fn pop_front(&mut self) -> Option<ServerEvent> {
        self.snapshot.pop_front().or_else(|| self.overflow.pop_front())
    }

    fn clear(&mut self) {
        self.snapshot.clear();
        self.overflow.clear();
        self.throttled = false;
    }
}

struct SubscriberEntry {
    current_agent_id: Option<AgentId>,
    queue: Arc<Mutex<SubscriberQueue>>,
    notify: Arc<Notify>,
}

/// Handle returned to the caller (the WS connection task) for draining a
/// subscriber's outbound queue.
#[derive(Clone)]
pub struct SubscriberHandle {
    pub id: String,
    queue: Arc<Mutex<SubscriberQueue>>,
    notify: Arc<Notify>,
}

impl SubscriberHandle {
    /// Await and return the next outbound event for this subscriber.
    pub async fn recv(&self) -> ServerEvent {
        loop {
            if let Some(event) = self.queue.lock().unwrap().pop_front() {
                return event;
            }
            self.notify.notified().await;
        }
    }
}

#[derive(Default)]
pub struct SubscriberHub {
    default_capacity: usize,
    subscribers: HashMap<String, SubscriberEntry>,
}

impl SubscriberHub {
    #[must_use]
    pub fn new(default_capacity: usize) -> Self {
        Self {
            default_capacity,
            subscribers: HashMap::new(),
        }
    }

    /// Registers a new subscriber with no active thread. Returns the
    /// id plus a handle the caller uses to drain events.
    pub fn register(&mut self) -> SubscriberHandle {
        let id = uuid::Uuid::new_v4().to_string();
        let queue = Arc::new(Mutex::new(SubscriberQueue::new(self.default_capacity)));
        let notify = Arc::new(Notify::new());
        self.subscribers.insert(
            id.clone(),
            SubscriberEntry {
                current_agent_id: None,
                queue: queue.clone(),
                notify: notify.clone(),
            },
        );
        SubscriberHandle { id, queue, notify }
    }

    pub fn unregister(&mut self, subscriber_id: &str) {
        self.subscribers.remove(subscriber_id);
    }

    /// Atomically switches the subscriber to `agent_id`, discarding any
    /// queued backlog from the previous thread, and enqueues a fresh
    /// `conversation_history` snapshot at the head of the (now-empty) queue.
    pub fn switch_to(
        &mut self,
        subscriber_id: &str,
        agent_id: AgentId,
        conversation: Vec<ConversationEvent>,
        activity: Vec<ConversationEvent>,
    ) {
        let Some(entry) = self.subscribers.get_mut(subscriber_id) else {
            return;
        };
        entry.current_agent_id = Some(agent_id.clone());
        let mut queue = entry.queue.lock().unwrap();
        queue.clear();
        queue.push_unbounded(ServerEvent::ConversationHistory {
            agent_id,
            conversation,
            activity,
        });
        drop(queue);
        entry.notify.notify_waiters();
    }

    /// Forward one conversation event to every subscriber whose current
    /// thread matches. No ordering is promised across agents, but every
    /// matching subscriber observes this agent's events in append order
    /// (spec §5).
    pub fn dispatch(&mut self, event: &ConversationEvent) {
        for entry in self.subscribers.values() {
            if entry.current_agent_id.as_deref() == Some(event.agent_id.as_str()) {
                let mut queue = entry.queue.lock().unwrap();
                queue.push_bounded(ServerEvent::Conversation(event.clone()));
                drop(queue);
                entry.notify.notify_waiters();
            }
        }
    }

    /// Broadcast a non-thread-scoped event (e.g. `agents_snapshot`) to
    /// every subscriber regardless of current thread.
    pub fn broadcast(&mut self, event: ServerEvent) {
        for entry in self.subscribers.values() {
            let mut queue = entry.queue.lock().unwrap();
            queue.push_bounded(event.clone());
            drop(queue);
            entry.notify.notify_waiters();
        }
    }

    pub fn send_to(&mut self, subscriber_id: &str, event: ServerEvent) {
        if let Some(entry) = self.subscribers.get(subscriber_id) {
            let mut queue = entry.queue.lock().unwrap();
            queue.push_unbounded(event);
            drop(queue);
            entry.notify.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{ConversationEventBody, MessageRole, MessageSource};

    fn message_event(agent_id: &str) -> ConversationEvent {
        ConversationEvent {
            agent_id: agent_id.to_string(),
            timestamp: chrono::Utc::now(),
            seq: 0,
            body: ConversationEventBody::ConversationMessage {
                role: MessageRole::Assistant,
                text: "hi".into(),
                source: MessageSource::SpeakToUser,
                source_context: None,
                attachments: None,
            },
        }
    }

    #[tokio::test]
    async fn dispatch_only_reaches_matching_subscriber() {
        let mut hub = SubscriberHub::new(10);
        let handle = hub.register();
        hub.switch_to(&handle.id, "a1".into(), vec![], vec![]);
        // drain the history snapshot
        let _ = handle.recv().await;

        hub.dispatch(&message_event("a2"));
        hub.dispatch(&message_event("a1"));

        let event = handle.recv().await;
        match event {
            ServerEvent::Conversation(e) => assert_eq!(e.agent_id, "a1"),
            _ => panic!("expected a conversation event"),
        }
    }

    #[tokio::test]
    async fn switch_to_discards_prior_backlog() {
        let mut hub = SubscriberHub::new(10);
        let handle = hub.register();
        hub.switch_to(&handle.id, "a1".into(), vec![], vec![]);
        let _ = handle.recv().await; // history

        hub.dispatch(&message_event("a1"));
        // switching away should drop the queued a1 event
        hub.switch_to(&handle.id, "a2".into(), vec![], vec![]);

        let event = handle.recv().await;
        assert!(matches!(event, ServerEvent::ConversationHistory { agent_id, .. } if agent_id == "a2"));
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_enqueues_throttle_notice() {
        let mut hub = SubscriberHub::new(4);
        let handle = hub.register();
        hub.switch_to(&handle.id, "a1".into(), vec![], vec![]);
        let _ = handle.recv().await; // history

        for _ in 0..100 {
            hub.dispatch(&message_event("a1"));
        }

        let mut saw_throttle = false;
        while let Ok(event) = tokio::time::timeout(std::time::Duration::from_millis(10), handle.recv()).await {
            if let ServerEvent::Conversation(e) = &event {
                if let ConversationEventBody::ConversationMessage { text, .. } = &e.body {
                    if text.contains("throttled") {
                        saw_throttle = true;
                    }
                }
            }
        }
        assert!(saw_throttle);
    }

    /// spec §4.5: a `conversation_history` snapshot is never dropped, even
    /// when the subscriber never drains before the next overflow. Unlike
    /// `overflow_drops_oldest_and_enqueues_throttle_notice` above, this test
    /// does NOT drain the history event before overflowing the queue.
    #[tokio::test]
    async fn history_snapshot_survives_immediate_overflow() {
        let mut hub = SubscriberHub::new(4);
        let handle = hub.register();
        hub.switch_to(&handle.id, "a1".into(), vec![], vec![]);

        for _ in 0..100 {
            hub.dispatch(&message_event("a1"));
        }

        let first = handle.recv().await;
        assert!(matches!(first, ServerEvent::ConversationHistory { agent_id, .. } if agent_id == "a1"));
    }
}
