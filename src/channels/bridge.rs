//! ChannelBridge: registers enabled channels, routes inbound messages into
//! SwarmManager, and dispatches outbound `speak_to_user` replies back to
//! the originating channel (spec §4.6). Grounded on OxiBot's
//! `oxibot-channels/src/manager.rs::ChannelManager`, generalized from a
//! name-keyed channel map to one bound to SwarmManager's subscriber model
//! instead of a second bespoke broadcast path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{error, info, warn};

use crate::config::Config;
use crate::swarm::SwarmManagerHandle;
use crate::wire::{AgentId, ConversationEventBody, IntegrationStatus, MessageRole, MessageSource, ServerEvent, SourceContext};

use super::base::Channel;
use super::bus::{MessageBus, OutboundMessage};
use super::slack::SlackChannel;
use super::telegram::TelegramChannel;

pub struct ChannelBridge {
    bus: Arc<MessageBus>,
    channels: HashMap<&'static str, Arc<dyn Channel>>,
}

impl ChannelBridge {
    /// Builds and starts every enabled channel, plus the inbound/outbound
    /// dispatcher tasks. Returns immediately; everything runs in the
    /// background for the lifetime of the daemon.
    pub fn start(config: &Config, swarm: SwarmManagerHandle) -> Self {
        let bus = Arc::new(MessageBus::new(256));
        let mut channels: HashMap<&'static str, Arc<dyn Channel>> = HashMap::new();

        let initial_backoff_ms = config.timeouts.ws_reconnect_backoff_ms;

        if config.slack.enabled {
            let channel: Arc<dyn Channel> = Arc::new(SlackChannel::new(config.slack.clone(), bus.clone()));
            channels.insert("slack", channel.clone());
            spawn_transport(channel, swarm.clone(), ServerEvent::SlackStatus {
                status: IntegrationStatus::Connecting,
            }, initial_backoff_ms);
        }
        if config.telegram.enabled {
            let channel: Arc<dyn Channel> = Arc::new(TelegramChannel::new(
                config.telegram.clone(),
                bus.clone(),
                config.timeouts.telegram_poll_secs,
            ));
            channels.insert("telegram", channel.clone());
            spawn_transport(channel, swarm.clone(), ServerEvent::TelegramStatus {
                status: IntegrationStatus::Connecting,
            }, initial_backoff_ms);
        }

        let last_context: Arc<Mutex<HashMap<AgentId, SourceContext>>> = Arc::new(Mutex::new(HashMap::new()));

        spawn_inbound_dispatcher(bus.clone(), swarm.clone(), last_context.clone());

        if config.slack.enabled {
            spawn_outbound_watcher(swarm.clone(), bus.clone(), config.slack.manager_id.clone(), last_context.clone());
        }
        if config.telegram.enabled {
            spawn_outbound_watcher(swarm.clone(), bus.clone(), config.telegram.manager_id.clone(), last_context.clone());
        }

        spawn_outbound_dispatcher(bus.clone(), channels.clone(), swarm.clone());

        Self { bus, channels }
    }

    #[must_use]
    pub fn bus(&self) -> Arc<MessageBus> {
        self.bus.clone()
    }

    #[must_use]
    pub fn channel_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.channels.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

/// One task per transport: keeps calling `start()` and retries with
/// exponential backoff on transport failure (spec §4.6 "transient
/// transport errors … retried with exponential backoff"), flipping status
/// to `error` after repeated failures.
fn spawn_transport(
    channel: Arc<dyn Channel>,
    swarm: SwarmManagerHandle,
    connecting_status: ServerEvent,
    initial_backoff_ms: u64,
) {
    tokio::spawn(async move {
        swarm.broadcast(connecting_status).await;
        let mut backoff_ms = initial_backoff_ms;
        let mut consecutive_failures = 0u32;
        loop {
            match channel.start().await {
                Ok(()) => {
                    info!(channel = channel.name(), "channel start() returned cleanly");
                    break;
                }
                Err(e) => {
                    consecutive_failures += 1;
                    error!(channel = channel.name(), error = %e, attempt = consecutive_failures, "channel transport failed");
                    if consecutive_failures >= 5 {
                        let status = error_status_event(channel.name());
                        swarm.broadcast(status).await;
                    }
                    tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
                    backoff_ms = (backoff_ms * 2).min(60_000);
                }
            }
        }
    });
}

fn error_status_event(name: &str) -> ServerEvent {
    match name {
        "slack" => ServerEvent::SlackStatus { status: IntegrationStatus::Error },
        _ => ServerEvent::TelegramStatus { status: IntegrationStatus::Error },
    }
}

/// Drains the inbound queue, remembers each agent's last `sourceContext`
/// (used to route the eventual reply), and forwards into SwarmManager.
fn spawn_inbound_dispatcher(
    bus: Arc<MessageBus>,
    swarm: SwarmManagerHandle,
    last_context: Arc<Mutex<HashMap<AgentId, SourceContext>>>,
) {
    tokio::spawn(async move {
        while let Some(msg) = bus.consume_inbound().await {
            if let Some(ctx) = &msg.input.source_context {
                last_context.lock().unwrap().insert(msg.input.agent_id.clone(), ctx.clone());
            }
            if let Err(e) = swarm.handle_input(msg.input).await {
                warn!(error = %e, "failed to route inbound channel message");
            }
        }
    });
}

/// Subscribes to one manager's conversation stream the same way a UI
/// client would, and turns its `speak_to_user` assistant messages into
/// outbound posts back to the channel that last messaged it.
fn spawn_outbound_watcher(
    swarm: SwarmManagerHandle,
    bus: Arc<MessageBus>,
    manager_id: AgentId,
    last_context: Arc<Mutex<HashMap<AgentId, SourceContext>>>,
) {
    if manager_id.is_empty() {
        return;
    }
    tokio::spawn(async move {
        let (handle, _) = swarm.subscribe(Some(manager_id.clone())).await;
        loop {
            let event = handle.recv().await;
            let ServerEvent::Conversation(event) = event else {
                continue;
            };
            if event.agent_id != manager_id {
                continue;
            }
            let ConversationEventBody::ConversationMessage {
                role: MessageRole::Assistant,
                source: MessageSource::SpeakToUser,
                text,
                ..
            } = event.body
            else {
                continue;
            };

            let Some(ctx) = last_context.lock().unwrap().get(&manager_id).cloned() else {
                continue;
            };
            if ctx.channel == crate::wire::ChannelKind::Web {
                continue; // web replies ride the same WS connection, not the bridge
            }
            bus.publish_outbound(OutboundMessage {
                agent_id: manager_id.clone(),
                source_context: ctx,
                text,
            })
            .await;
        }
    });
}

fn spawn_outbound_dispatcher(
    bus: Arc<MessageBus>,
    channels: HashMap<&'static str, Arc<dyn Channel>>,
    swarm: SwarmManagerHandle,
) {
    tokio::spawn(async move {
        while let Some(msg) = bus.consume_outbound().await {
            let name = match msg.source_context.channel {
                crate::wire::ChannelKind::Slack => "slack",
                crate::wire::ChannelKind::Telegram => "telegram",
                crate::wire::ChannelKind::Web => continue,
            };
            let Some(channel) = channels.get(name) else {
                continue;
            };
            if let Err(e) = channel.send(&msg).await {
                error!(channel = name, error = %e, "outbound channel post failed");
                swarm.report_channel_error(msg.agent_id.clone(), e.to_string()).await;
            }
        }
    });
}
