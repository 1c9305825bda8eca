//! Send path used by the HTTP API.
//!
//! Automated sends register an echo marker and write their own history
//! entry before the protocol call. Manual sends are recorded later, when
//! their echo comes back through the pipeline.

use super::{Gateway, ASSISTANT_NAME};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};
use wabridge_core::{
    error::BridgeError,
    message::{
        caption_or, document_text, ChatEntry, ConversationId, Direction, MediaKind,
        IMAGE_PLACEHOLDER,
    },
    traits::Session,
};

/// Who asked for a send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Relayed on behalf of a human; the echo is stored as an operator message.
    Manual,
    /// Generated by automation; stored now, echo suppressed.
    Automated { pushname: Option<String> },
}

impl Origin {
    pub fn from_request(is_ai_reply: bool, pushname: Option<String>) -> Self {
        if is_ai_reply {
            Origin::Automated {
                pushname: pushname.filter(|p| !p.trim().is_empty()),
            }
        } else {
            Origin::Manual
        }
    }
}

/// A file received through a multipart request.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub mimetype: String,
    pub bytes: Vec<u8>,
}

/// What the history entry and the echo marker of a send look like.
struct Outgoing {
    text: String,
    media_url: Option<String>,
    media_type: Option<MediaKind>,
}

impl Gateway {
    pub async fn send_text(
        &self,
        to: &str,
        text: &str,
        origin: &Origin,
    ) -> Result<String, BridgeError> {
        let to = ConversationId::parse(to)?;
        if text.trim().is_empty() {
            return Err(BridgeError::InvalidRequest("message is empty".into()));
        }
        let outgoing = Outgoing {
            text: text.to_string(),
            media_url: None,
            media_type: None,
        };
        let target = &to;
        self.deliver(target, outgoing, origin, |session| async move {
            session.send_text(target, text).await
        })
        .await
    }

    /// Fetch an image from `url` and send it. The history entry links to `url`.
    pub async fn send_image_url(
        &self,
        to: &str,
        url: &str,
        caption: Option<&str>,
        origin: &Origin,
    ) -> Result<String, BridgeError> {
        let to = ConversationId::parse(to)?;
        require_url(url, "image_url")?;
        self.supervisor.session()?;

        let (bytes, mimetype) = self.fetch(url).await?;
        let mimetype = mimetype
            .filter(|m| m.starts_with("image/"))
            .unwrap_or_else(|| "image/jpeg".to_string());
        let caption = non_empty(caption);
        let outgoing = Outgoing {
            text: caption_or(&caption.map(str::to_string), IMAGE_PLACEHOLDER),
            media_url: Some(url.to_string()),
            media_type: Some(MediaKind::Image),
        };
        let target = &to;
        self.deliver(target, outgoing, origin, |session| async move {
            session.send_image(target, bytes, &mimetype, caption).await
        })
        .await
    }

    pub async fn send_document_url(
        &self,
        to: &str,
        url: &str,
        file_name: Option<&str>,
        mimetype: Option<&str>,
        caption: Option<&str>,
        origin: &Origin,
    ) -> Result<String, BridgeError> {
        let to = ConversationId::parse(to)?;
        require_url(url, "document_url")?;
        self.supervisor.session()?;

        let (bytes, fetched_type) = self.fetch(url).await?;
        let file_name = non_empty(file_name)
            .map(str::to_string)
            .unwrap_or_else(|| file_name_from_url(url));
        let mimetype = non_empty(mimetype)
            .map(str::to_string)
            .or(fetched_type)
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let caption = non_empty(caption);
        let outgoing = Outgoing {
            text: document_text(&file_name),
            media_url: Some(url.to_string()),
            media_type: Some(MediaKind::Document),
        };
        let target = &to;
        self.deliver(target, outgoing, origin, |session| async move {
            session
                .send_document(target, bytes, &file_name, &mimetype, caption)
                .await
        })
        .await
    }

    pub async fn send_image_upload(
        &self,
        to: &str,
        upload: Upload,
        caption: Option<&str>,
        origin: &Origin,
    ) -> Result<String, BridgeError> {
        let to = ConversationId::parse(to)?;
        if !upload.mimetype.starts_with("image/") {
            return Err(BridgeError::InvalidRequest("File is not an image.".into()));
        }
        if upload.bytes.is_empty() {
            return Err(BridgeError::InvalidRequest("uploaded file is empty".into()));
        }
        let caption = non_empty(caption);
        let outgoing = Outgoing {
            text: caption_or(&caption.map(str::to_string), IMAGE_PLACEHOLDER),
            media_url: None,
            media_type: Some(MediaKind::Image),
        };
        let Upload {
            bytes, mimetype, ..
        } = upload;
        let target = &to;
        self.deliver(target, outgoing, origin, |session| async move {
            session.send_image(target, bytes, &mimetype, caption).await
        })
        .await
    }

    pub async fn send_document_upload(
        &self,
        to: &str,
        upload: Upload,
        caption: Option<&str>,
        origin: &Origin,
    ) -> Result<String, BridgeError> {
        let to = ConversationId::parse(to)?;
        if upload.mimetype.starts_with("image/") {
            return Err(BridgeError::InvalidRequest(
                "File is an image, not a document.".into(),
            ));
        }
        if upload.bytes.is_empty() {
            return Err(BridgeError::InvalidRequest("uploaded file is empty".into()));
        }
        let caption = non_empty(caption);
        let Upload {
            file_name,
            mimetype,
            bytes,
        } = upload;
        let file_name = non_empty(Some(file_name.as_str()))
            .map(str::to_string)
            .unwrap_or_else(|| "document".to_string());
        let outgoing = Outgoing {
            text: document_text(&file_name),
            media_url: None,
            media_type: Some(MediaKind::Document),
        };
        let target = &to;
        self.deliver(target, outgoing, origin, |session| async move {
            session
                .send_document(target, bytes, &file_name, &mimetype, caption)
                .await
        })
        .await
    }

    pub async fn set_typing(&self, to: &str, typing: bool) -> Result<(), BridgeError> {
        let to = ConversationId::parse(to)?;
        self.supervisor.session()?.set_typing(&to, typing).await
    }

    /// Send a read receipt for one peer message.
    pub async fn mark_read(&self, chat: &str, message_id: &str) -> Result<(), BridgeError> {
        let chat = ConversationId::parse(chat)?;
        if message_id.trim().is_empty() {
            return Err(BridgeError::InvalidRequest("messageId is required".into()));
        }
        self.supervisor
            .session()?
            .mark_read(&chat, &[message_id.to_string()])
            .await
    }

    async fn deliver<F, Fut>(
        &self,
        to: &ConversationId,
        outgoing: Outgoing,
        origin: &Origin,
        send: F,
    ) -> Result<String, BridgeError>
    where
        F: FnOnce(Arc<dyn Session>) -> Fut,
        Fut: Future<Output = Result<String, BridgeError>>,
    {
        let session = self.supervisor.session()?;

        // Marker and history entry must exist before the echo can arrive.
        if let Origin::Automated { pushname } = origin {
            self.dedup.register_outbound(to, &outgoing.text);
            let entry = ChatEntry::new(
                outgoing.text.clone(),
                outgoing.media_url,
                outgoing.media_type,
                Direction::Outgoing,
                pushname.as_deref().unwrap_or(ASSISTANT_NAME),
            );
            self.record(to, entry).await;
        }

        match send(session).await {
            Ok(message_id) => {
                info!("sent message {message_id} to {to}");
                Ok(message_id)
            }
            Err(e) => {
                warn!("send to {to} failed: {e}");
                if matches!(origin, Origin::Automated { .. }) {
                    self.dedup.withdraw_outbound(to, &outgoing.text);
                }
                Err(e)
            }
        }
    }

    async fn fetch(&self, url: &str) -> Result<(Vec<u8>, Option<String>), BridgeError> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| BridgeError::Media(format!("failed to download {url}: {e}")))?;
        if !resp.status().is_success() {
            return Err(BridgeError::Media(format!(
                "failed to download {url}: {}",
                resp.status()
            )));
        }
        let mimetype = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| BridgeError::Media(format!("failed to read {url}: {e}")))?;
        Ok((bytes.to_vec(), mimetype))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn require_url(url: &str, field: &str) -> Result<(), BridgeError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(BridgeError::InvalidRequest(format!(
            "{field} must be an http(s) URL"
        )))
    }
}

pub(super) fn file_name_from_url(url: &str) -> String {
    url.split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').next())
        .filter(|name| !name.is_empty() && !name.contains(':'))
        .unwrap_or("document")
        .to_string()
}
