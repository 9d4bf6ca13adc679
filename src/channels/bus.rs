//! Bounded inbound/outbound message bus connecting channel adapters to
//! `ChannelBridge`'s dispatcher, following OxiBot's `oxibot-core/src/bus/queue.rs`
//! `MessageBus` (there carrying bare strings; here the daemon's own
//! [`Input`]/[`SourceContext`] wire types, so no field gets re-invented at
//! the bridge boundary).

use tokio::sync::{mpsc, Mutex};

use crate::wire::{AgentId, Input, SourceContext};

/// A normalized inbound message, already carrying the `Input` SwarmManager
/// expects plus enough of its own context to do allow-list/posting logic.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub input: Input,
}

/// An assistant reply bound for the channel named in `source_context.channel`.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub agent_id: AgentId,
    pub source_context: SourceContext,
    pub text: String,
}

pub struct MessageBus {
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Mutex<mpsc::Receiver<InboundMessage>>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    outbound_rx: Mutex<mpsc::Receiver<OutboundMessage>>,
}

impl MessageBus {
    #[must_use]
    pub fn new(buffer_size: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(buffer_size);
        let (outbound_tx, outbound_rx) = mpsc::channel(buffer_size);
        Self {
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            outbound_tx,
            outbound_rx: Mutex::new(outbound_rx),
        }
    }

    pub async fn publish_inbound(&self, msg: InboundMessage) {
        let _ = self.inbound_tx.send(msg).await;
    }

    pub async fn consume_inbound(&self) -> Option<InboundMessage> {
        self.inbound_rx.lock().await.recv().await
    }

    pub async fn publish_outbound(&self, msg: OutboundMessage) {
        let _ = self.outbound_tx.send(msg).await;
    }

    pub async fn consume_outbound(&self) -> Option<OutboundMessage> {
        self.outbound_rx.lock().await.recv().await
    }

    #[must_use]
    pub fn inbound_sender(&self) -> mpsc::Sender<InboundMessage> {
        self.inbound_tx.clone()
    }

    #[must_use]
    pub fn outbound_sender(&self) -> mpsc::Sender<OutboundMessage> {
        self.outbound_tx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{ChannelKind, Delivery};

    fn input(agent_id: &str) -> Input {
        Input {
            text: "hi".into(),
            attachments: vec![],
            source_context: Some(SourceContext {
                channel: ChannelKind::Slack,
                channel_id: Some("D1".into()),
                channel_type: Some("dm".into()),
                user_id: Some("U1".into()),
                thread_ts: None,
            }),
            delivery: Delivery::Auto,
            agent_id: agent_id.into(),
        }
    }

    #[tokio::test]
    async fn inbound_round_trips_in_order() {
        let bus = MessageBus::new(10);
        bus.publish_inbound(InboundMessage { input: input("a1") }).await;
        bus.publish_inbound(InboundMessage { input: input("a2") }).await;
        assert_eq!(bus.consume_inbound().await.unwrap().input.agent_id, "a1");
        assert_eq!(bus.consume_inbound().await.unwrap().input.agent_id, "a2");
    }

    #[tokio::test]
    async fn outbound_round_trips() {
        let bus = MessageBus::new(10);
        bus.publish_outbound(OutboundMessage {
            agent_id: "a1".into(),
            source_context: input("a1").source_context.unwrap(),
            text: "pong".into(),
        })
        .await;
        let msg = bus.consume_outbound().await.unwrap();
        assert_eq!(msg.text, "pong");
    }
}
