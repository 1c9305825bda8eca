//! Protocol event translation: closure classification, envelope unwrapping,
//! content fields, and the media download handle.

use std::sync::Arc;

use async_trait::async_trait;
use wacore::types::events::{ConnectFailureReason, Event};
use waproto::whatsapp::Message;
use whatsapp_rust::client::Client;

use wabridge_core::{
    error::BridgeError,
    message::MediaKind,
    session::{CloseReason, InboundMessage, MediaPayload, RawContent},
    traits::MediaSource,
};

/// Classify protocol events that end the session. `None` for everything else.
///
/// Connect failures and fatal stream errors are not followed by `Disconnected`.
pub(super) fn closure_reason(event: &Event) -> Option<CloseReason> {
    let reason = match event {
        Event::Disconnected(_) => CloseReason::Transient("stream disconnected".into()),
        Event::LoggedOut(out) => match out.reason {
            ConnectFailureReason::LoggedOut => CloseReason::LoggedOut,
            _ => CloseReason::AuthInvalid,
        },
        Event::ConnectFailure(failure) => match failure.reason {
            ConnectFailureReason::CatExpired | ConnectFailureReason::CatInvalid => {
                CloseReason::AuthInvalid
            }
            reason => CloseReason::from_status_code(
                u16::try_from(reason.code()).ok(),
                format!("connect failure {}: {}", reason.code(), failure.message),
            ),
        },
        Event::StreamReplaced(_) => {
            CloseReason::Transient("stream replaced by another connection".into())
        }
        Event::StreamError(err) => CloseReason::Transient(format!("stream error {}", err.code)),
        Event::TemporaryBan(ban) => CloseReason::Transient(format!("temporary ban: {}", ban.code)),
        Event::ClientOutdated(_) => CloseReason::Transient("client version rejected".into()),
        _ => return None,
    };
    Some(reason)
}

/// Build an [`InboundMessage`] from a protocol message event.
pub(super) fn inbound_message(
    msg: Message,
    info: wacore::types::message::MessageInfo,
    client: Arc<Client>,
) -> InboundMessage {
    let inner = unwrap_envelope(&msg).clone();
    let content = raw_content(&inner);
    let has_media = content.image.is_some()
        || content.audio.is_some()
        || content.video.is_some()
        || content.document.is_some();

    InboundMessage {
        chat: info.source.chat.to_string(),
        message_id: info.id.clone(),
        from_me: info.source.is_from_me,
        push_name: Some(info.push_name.clone()).filter(|n| !n.is_empty()),
        content,
        media: has_media.then(|| {
            Arc::new(WaMediaSource {
                client,
                message: inner,
            }) as Arc<dyn MediaSource>
        }),
    }
}

/// Strip device-sent, ephemeral, and view-once wrappers.
pub(super) fn unwrap_envelope(msg: &Message) -> &Message {
    msg.device_sent_message
        .as_ref()
        .and_then(|d| d.message.as_deref())
        .or_else(|| {
            msg.ephemeral_message
                .as_ref()
                .and_then(|e| e.message.as_deref())
        })
        .or_else(|| {
            msg.view_once_message
                .as_ref()
                .and_then(|v| v.message.as_deref())
        })
        .unwrap_or(msg)
}

/// Copy the content fields the classifier inspects.
pub(super) fn raw_content(msg: &Message) -> RawContent {
    RawContent {
        tag: content_tag(msg).to_string(),
        image: msg.image_message.as_ref().map(|m| MediaPayload {
            caption: m.caption.clone(),
            mimetype: m.mimetype.clone(),
            ..Default::default()
        }),
        audio: msg.audio_message.as_ref().map(|m| MediaPayload {
            mimetype: m.mimetype.clone(),
            voice_note: m.ptt.unwrap_or(false),
            ..Default::default()
        }),
        video: msg.video_message.as_ref().map(|m| MediaPayload {
            caption: m.caption.clone(),
            mimetype: m.mimetype.clone(),
            ..Default::default()
        }),
        document: msg.document_message.as_ref().map(|m| MediaPayload {
            caption: m.caption.clone(),
            mimetype: m.mimetype.clone(),
            file_name: m.file_name.clone(),
            ..Default::default()
        }),
        conversation: msg.conversation.clone(),
        extended_text: msg
            .extended_text_message
            .as_ref()
            .and_then(|e| e.text.clone()),
    }
}

/// Wire name of the populated content field.
pub(super) fn content_tag(msg: &Message) -> &'static str {
    if msg.conversation.is_some() {
        "conversation"
    } else if msg.image_message.is_some() {
        "imageMessage"
    } else if msg.audio_message.is_some() {
        "audioMessage"
    } else if msg.video_message.is_some() {
        "videoMessage"
    } else if msg.document_message.is_some() {
        "documentMessage"
    } else if msg.extended_text_message.is_some() {
        "extendedTextMessage"
    } else if msg.sticker_message.is_some() {
        "stickerMessage"
    } else if msg.reaction_message.is_some() {
        "reactionMessage"
    } else if msg.protocol_message.is_some() {
        "protocolMessage"
    } else {
        "unknown"
    }
}

/// Download handle bound to one received message.
struct WaMediaSource {
    client: Arc<Client>,
    message: Message,
}

#[async_trait]
impl MediaSource for WaMediaSource {
    async fn download(&self, kind: MediaKind) -> Result<Vec<u8>, BridgeError> {
        let m = &self.message;
        let missing = || {
            BridgeError::Media(format!("message carries no {} content", kind.as_str()))
        };
        let result = match kind {
            MediaKind::Image => {
                let img = m.image_message.as_ref().ok_or_else(missing)?;
                self.client.download(img.as_ref()).await
            }
            MediaKind::Voice | MediaKind::Audio => {
                let audio = m.audio_message.as_ref().ok_or_else(missing)?;
                self.client.download(audio.as_ref()).await
            }
            MediaKind::Video => {
                let video = m.video_message.as_ref().ok_or_else(missing)?;
                self.client.download(video.as_ref()).await
            }
            MediaKind::Document => {
                let doc = m.document_message.as_ref().ok_or_else(missing)?;
                self.client.download(doc.as_ref()).await
            }
        };
        result.map_err(|e| BridgeError::Media(format!("whatsapp download failed: {e}")))
    }
}
