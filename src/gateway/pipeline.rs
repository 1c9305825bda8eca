//! Inbound processing: classify, drop echoes, persist, forward.

use super::{Gateway, OPERATOR_NAME};
use crate::dispatch::{AiReply, ManualReply, Webhook};
use tracing::{debug, info, warn};
use wabridge_core::{
    message::{ChatEntry, Direction, InboundEvent},
    session::InboundMessage,
};

impl Gateway {
    pub(crate) async fn handle_message(&self, msg: InboundMessage) {
        // 1. Classify (downloads media).
        let event = match self.classifier.classify(&msg).await {
            Ok(event) => event,
            Err(e) => {
                warn!("dropping message {} from {}: {e}", msg.message_id, msg.chat);
                return;
            }
        };
        let text = event.display_text();

        // 2. Echo of our own automated send: already stored by the send path.
        if event.direction.is_outgoing()
            && self.dedup.should_suppress_echo(&event.conversation, &text)
        {
            debug!("echo of automated send to {} suppressed", event.conversation);
            return;
        }

        info!(
            "[{}] {} {}: {}",
            event.conversation,
            if event.direction.is_outgoing() { "->" } else { "<-" },
            event.content_tag,
            preview(&text)
        );

        // 3. Persist. A failed or collapsed write does not stop forwarding.
        let entry = ChatEntry::new(
            text.clone(),
            event.payload.media_url().map(str::to_string),
            event.payload.media_kind(),
            event.direction,
            display_name(&event),
        );
        self.record(&event.conversation, entry).await;

        // 4. Forward.
        let hook = webhook_for(&event, text);
        let route = hook.route();
        if let Err(e) = self.forward.forward(hook).await {
            warn!("{route} webhook failed for {}: {e}", event.conversation);
        }
    }
}

/// Name stored on the history entry.
pub(super) fn display_name(event: &InboundEvent) -> String {
    match event.direction {
        Direction::Outgoing => OPERATOR_NAME.to_string(),
        Direction::Incoming => event
            .push_name
            .clone()
            .unwrap_or_else(|| event.conversation.to_string()),
    }
}

pub(super) fn webhook_for(event: &InboundEvent, text: String) -> Webhook {
    let pushname = event.push_name.clone().unwrap_or_default();
    match event.direction {
        Direction::Outgoing => Webhook::Manual(ManualReply {
            from: event.conversation.to_string(),
            message: text,
            message_id: event.message_id.clone(),
            pushname,
        }),
        Direction::Incoming => Webhook::Ai(AiReply {
            from: event.conversation.to_string(),
            message: text,
            content_tag: event.content_tag.clone(),
            media_url: event.payload.media_url().map(str::to_string),
            media_type: event.payload.media_kind().map(|k| k.as_str().to_string()),
            message_id: event.message_id.clone(),
            pushname,
        }),
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() > 60 {
        let truncated: String = text.chars().take(60).collect();
        format!("{truncated}...")
    } else {
        text.to_string()
    }
}
