//! The abstract interface every chat channel adapter implements, ported
//! from OxiBot's `oxibot-channels/src/base.rs` `Channel` trait (there
//! built on `anyhow::Result`; here on [`crate::error::Result`] so a
//! transport failure carries one of the daemon's stable error codes).

use async_trait::async_trait;

use crate::error::Result;

use super::bus::OutboundMessage;

/// Every chat channel adapter (Slack, Telegram) implements this trait.
/// `ChannelBridge` holds `Arc<dyn Channel>` and orchestrates start/send
/// across all enabled channels.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Unique channel name, matching `SourceContext::channel`'s wire tag
    /// (`"slack"`, `"telegram"`).
    fn name(&self) -> &'static str;

    /// Begin listening for incoming messages. Long-running; returns once
    /// the channel's shutdown signal fires or the transport dies.
    async fn start(&self) -> Result<()>;

    /// Deliver an outbound reply to this channel.
    async fn send(&self, msg: &OutboundMessage) -> Result<()>;
}
