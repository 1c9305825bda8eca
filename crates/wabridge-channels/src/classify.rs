//! Message classification: one raw protocol message in, one
//! [`InboundEvent`] out.
//!
//! Content kinds are checked in a fixed order: image, audio, video,
//! document, text. The first present field wins. Media is materialized at
//! most once per message; a failed download keeps the placeholder text and
//! drops the media reference.

use std::sync::Arc;

use tracing::warn;

use wabridge_core::{
    error::BridgeError,
    message::{ConversationId, Direction, InboundEvent, MediaKind, Payload},
    session::{InboundMessage, MediaPayload},
};

use crate::media::{self, Encoding, MediaMaterializer};

pub struct MessageClassifier {
    materializer: Arc<MediaMaterializer>,
}

impl MessageClassifier {
    pub fn new(materializer: Arc<MediaMaterializer>) -> Self {
        Self { materializer }
    }

    /// Classify a protocol message. Fails only when the chat address cannot
    /// be normalized into a conversation id.
    pub async fn classify(&self, msg: &InboundMessage) -> Result<InboundEvent, BridgeError> {
        let conversation = ConversationId::parse(&msg.chat)?;
        let payload = self.payload(msg).await;

        Ok(InboundEvent {
            conversation,
            message_id: msg.message_id.clone(),
            direction: Direction::from_self(msg.from_me),
            push_name: msg.push_name.clone().filter(|n| !n.is_empty()),
            content_tag: msg.content.tag.clone(),
            payload,
        })
    }

    async fn payload(&self, msg: &InboundMessage) -> Payload {
        let content = &msg.content;

        if let Some(image) = &content.image {
            return Payload::Image {
                caption: caption(image),
                media_url: self.fetch(msg, MediaKind::Image, Encoding::Image).await,
            };
        }

        if let Some(audio) = &content.audio {
            let kind = if audio.voice_note {
                MediaKind::Voice
            } else {
                MediaKind::Audio
            };
            let extension = media::raw_extension(kind, audio.mimetype.as_deref(), None);
            let media_url = self.fetch(msg, kind, Encoding::Raw { extension }).await;
            return match kind {
                MediaKind::Voice => Payload::Voice { media_url },
                _ => Payload::Audio { media_url },
            };
        }

        if let Some(video) = &content.video {
            let extension =
                media::raw_extension(MediaKind::Video, video.mimetype.as_deref(), None);
            return Payload::Video {
                caption: caption(video),
                media_url: self
                    .fetch(msg, MediaKind::Video, Encoding::Raw { extension })
                    .await,
            };
        }

        if let Some(doc) = &content.document {
            let file_name = doc.file_name.clone().unwrap_or_default();
            let encoding = match media::file_extension(&file_name) {
                Some(ext) if media::is_image_extension(&ext) => Encoding::Image,
                _ => Encoding::Raw {
                    extension: media::raw_extension(
                        MediaKind::Document,
                        doc.mimetype.as_deref(),
                        Some(&file_name),
                    ),
                },
            };
            return Payload::Document {
                media_url: self.fetch(msg, MediaKind::Document, encoding).await,
                file_name,
            };
        }

        let text = [&content.conversation, &content.extended_text]
            .into_iter()
            .flatten()
            .find(|t| !t.is_empty());
        match text {
            Some(text) => Payload::Text { text: text.clone() },
            None => Payload::Unrecognized,
        }
    }

    async fn fetch(
        &self,
        msg: &InboundMessage,
        kind: MediaKind,
        encoding: Encoding,
    ) -> Option<String> {
        let Some(source) = msg.media.as_deref() else {
            warn!("no media handle for {} message {}", kind.as_str(), msg.message_id);
            return None;
        };
        match self.materializer.materialize(source, kind, encoding).await {
            Ok(stored) => Some(stored.url),
            Err(e) => {
                warn!(
                    "media download failed for message {}, using placeholder: {e}",
                    msg.message_id
                );
                None
            }
        }
    }
}

fn caption(media: &MediaPayload) -> Option<String> {
    media.caption.clone().filter(|c| !c.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use wabridge_core::session::RawContent;
    use wabridge_core::traits::MediaSource;

    #[derive(Default)]
    struct FakeMedia {
        bytes: Option<Vec<u8>>,
        calls: AtomicUsize,
        kinds: Mutex<Vec<MediaKind>>,
    }

    #[async_trait]
    impl MediaSource for FakeMedia {
        async fn download(&self, kind: MediaKind) -> Result<Vec<u8>, BridgeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.kinds.lock().unwrap().push(kind);
            self.bytes
                .clone()
                .ok_or_else(|| BridgeError::Media("media server returned 410".into()))
        }
    }

    fn png() -> Vec<u8> {
        let img = image::ImageBuffer::from_fn(64, 32, |_, _| image::Rgb([10u8, 20, 30]));
        let mut buf = std::io::Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn classifier(dir: &std::path::Path) -> MessageClassifier {
        let m = MediaMaterializer::new(dir, "http://host/media", 1024, 60).unwrap();
        MessageClassifier::new(Arc::new(m))
    }

    fn message(
        content: RawContent,
        media: Option<Arc<FakeMedia>>,
        from_me: bool,
    ) -> InboundMessage {
        InboundMessage {
            chat: "628111@s.whatsapp.net".into(),
            message_id: "3EB0".into(),
            from_me,
            push_name: Some("Budi".into()),
            content,
            media: media.map(|m| m as Arc<dyn MediaSource>),
        }
    }

    #[tokio::test]
    async fn test_plain_text() {
        let tmp = tempfile::tempdir().unwrap();
        let event = classifier(tmp.path())
            .classify(&message(
                RawContent {
                    tag: "conversation".into(),
                    conversation: Some("halo".into()),
                    ..Default::default()
                },
                None,
                false,
            ))
            .await
            .unwrap();
        assert_eq!(event.conversation.as_str(), "628111");
        assert_eq!(event.direction, Direction::Incoming);
        assert_eq!(event.display_text(), "halo");
        assert_eq!(event.payload.media_kind(), None);
        assert_eq!(event.push_name.as_deref(), Some("Budi"));
    }

    #[tokio::test]
    async fn test_extended_text_fallback_and_unrecognized() {
        let tmp = tempfile::tempdir().unwrap();
        let c = classifier(tmp.path());
        let event = c
            .classify(&message(
                RawContent {
                    tag: "extendedTextMessage".into(),
                    conversation: Some(String::new()),
                    extended_text: Some("see https://x".into()),
                    ..Default::default()
                },
                None,
                true,
            ))
            .await
            .unwrap();
        assert_eq!(event.payload, Payload::Text { text: "see https://x".into() });
        assert_eq!(event.direction, Direction::Outgoing);

        let event = c
            .classify(&message(
                RawContent {
                    tag: "reactionMessage".into(),
                    ..Default::default()
                },
                None,
                false,
            ))
            .await
            .unwrap();
        assert_eq!(event.payload, Payload::Unrecognized);
        assert_eq!(event.display_text(), "[non-text]");
    }

    #[tokio::test]
    async fn test_image_with_caption_materialized_once() {
        let tmp = tempfile::tempdir().unwrap();
        let media = Arc::new(FakeMedia {
            bytes: Some(png()),
            ..Default::default()
        });
        let event = classifier(tmp.path())
            .classify(&message(
                RawContent {
                    tag: "imageMessage".into(),
                    image: Some(MediaPayload {
                        caption: Some("harga?".into()),
                        mimetype: Some("image/png".into()),
                        ..Default::default()
                    }),
                    // A text field alongside must not win over the image.
                    conversation: Some("ignored".into()),
                    ..Default::default()
                },
                Some(media.clone()),
                false,
            ))
            .await
            .unwrap();
        assert_eq!(event.display_text(), "harga?");
        assert_eq!(event.payload.media_kind(), Some(MediaKind::Image));
        let url = event.payload.media_url().unwrap();
        assert!(url.starts_with("http://host/media/") && url.ends_with(".jpg"));
        assert_eq!(media.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_image_download_failure_falls_back() {
        let tmp = tempfile::tempdir().unwrap();
        let media = Arc::new(FakeMedia::default());
        let event = classifier(tmp.path())
            .classify(&message(
                RawContent {
                    tag: "imageMessage".into(),
                    image: Some(MediaPayload::default()),
                    ..Default::default()
                },
                Some(media.clone()),
                false,
            ))
            .await
            .unwrap();
        assert_eq!(event.display_text(), "[Image]");
        assert_eq!(event.payload.media_kind(), Some(MediaKind::Image));
        assert_eq!(event.payload.media_url(), None);
        assert_eq!(media.calls.load(Ordering::SeqCst), 1, "no retry");
    }

    #[tokio::test]
    async fn test_voice_vs_audio() {
        let tmp = tempfile::tempdir().unwrap();
        let c = classifier(tmp.path());
        let media = Arc::new(FakeMedia {
            bytes: Some(b"OggS".to_vec()),
            ..Default::default()
        });
        let voice = c
            .classify(&message(
                RawContent {
                    tag: "audioMessage".into(),
                    audio: Some(MediaPayload {
                        mimetype: Some("audio/ogg; codecs=opus".into()),
                        voice_note: true,
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                Some(media.clone()),
                false,
            ))
            .await
            .unwrap();
        assert_eq!(voice.display_text(), "[Voice Note]");
        assert!(voice.payload.media_url().unwrap().ends_with(".ogg"));

        let audio = c
            .classify(&message(
                RawContent {
                    tag: "audioMessage".into(),
                    audio: Some(MediaPayload::default()),
                    ..Default::default()
                },
                Some(media.clone()),
                false,
            ))
            .await
            .unwrap();
        assert_eq!(audio.display_text(), "[Audio]");
        assert_eq!(audio.payload.media_kind(), Some(MediaKind::Audio));
        assert!(audio.payload.media_url().unwrap().ends_with(".mp3"));
        assert_eq!(
            *media.kinds.lock().unwrap(),
            vec![MediaKind::Voice, MediaKind::Audio]
        );
    }

    #[tokio::test]
    async fn test_video_placeholder() {
        let tmp = tempfile::tempdir().unwrap();
        let media = Arc::new(FakeMedia {
            bytes: Some(vec![0, 0, 0, 24]),
            ..Default::default()
        });
        let event = classifier(tmp.path())
            .classify(&message(
                RawContent {
                    tag: "videoMessage".into(),
                    video: Some(MediaPayload::default()),
                    ..Default::default()
                },
                Some(media),
                false,
            ))
            .await
            .unwrap();
        assert_eq!(event.display_text(), "[Video]");
        assert!(event.payload.media_url().unwrap().ends_with(".mp4"));
    }

    #[tokio::test]
    async fn test_documents() {
        let tmp = tempfile::tempdir().unwrap();
        let c = classifier(tmp.path());

        let pdf = Arc::new(FakeMedia {
            bytes: Some(b"%PDF-1.4".to_vec()),
            ..Default::default()
        });
        let event = c
            .classify(&message(
                RawContent {
                    tag: "documentMessage".into(),
                    document: Some(MediaPayload {
                        file_name: Some("Invoice.pdf".into()),
                        caption: Some("ignored for documents".into()),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                Some(pdf),
                false,
            ))
            .await
            .unwrap();
        assert_eq!(event.display_text(), "[Document] Invoice.pdf");
        assert_eq!(event.payload.media_kind(), Some(MediaKind::Document));
        assert!(event.payload.media_url().unwrap().ends_with(".pdf"));

        let photo = Arc::new(FakeMedia {
            bytes: Some(png()),
            ..Default::default()
        });
        let event = c
            .classify(&message(
                RawContent {
                    tag: "documentMessage".into(),
                    document: Some(MediaPayload {
                        file_name: Some("scan.PNG".into()),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                Some(photo.clone()),
                false,
            ))
            .await
            .unwrap();
        assert_eq!(event.display_text(), "[Document] scan.PNG");
        assert!(event.payload.media_url().unwrap().ends_with(".jpg"));
        assert_eq!(*photo.kinds.lock().unwrap(), vec![MediaKind::Document]);
    }

    #[tokio::test]
    async fn test_invalid_chat_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let mut msg = message(RawContent::default(), None, false);
        msg.chat = "@broadcast".into();
        assert!(classifier(tmp.path()).classify(&msg).await.is_err());
    }
}
