//! ChannelBridge: cross-channel routing for Slack/Telegram/web (spec §4.6).

mod base;
mod bridge;
mod bus;
mod slack;
mod telegram;
mod web;

pub use base::Channel;
pub use bridge::ChannelBridge;
pub use bus::{InboundMessage, MessageBus, OutboundMessage};
pub use web::normalize_web_input;
