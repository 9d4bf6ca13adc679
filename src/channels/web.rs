//! Web is not a transport adapter — messages already arrive over the same
//! WebSocket subscribers use. This just builds the `sourceContext` the web
//! UI's `user_message` commands get tagged with (spec §4.6 "Web" bullet).

use crate::wire::{Attachment, ChannelKind, Delivery, Input, SourceContext};

#[must_use]
pub fn normalize_web_input(
    agent_id: String,
    text: String,
    attachments: Vec<Attachment>,
    delivery: Delivery,
) -> Input {
    Input {
        text,
        attachments,
        source_context: Some(SourceContext {
            channel: ChannelKind::Web,
            channel_id: None,
            channel_type: None,
            user_id: None,
            thread_ts: None,
        }),
        delivery,
        agent_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn web_input_carries_web_source_context() {
        let input = normalize_web_input("a1".into(), "hi".into(), vec![], Delivery::Auto);
        let ctx = input.source_context.unwrap();
        assert_eq!(ctx.channel, ChannelKind::Web);
        assert!(ctx.channel_id.is_none());
    }
}
