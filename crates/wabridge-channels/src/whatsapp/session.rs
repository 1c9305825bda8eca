//! [`Session`] implementation over a running `whatsapp-rust` client.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use waproto::whatsapp::message::{DocumentMessage, ImageMessage};
use whatsapp_rust::client::Client;
use whatsapp_rust::download::MediaType;

use wabridge_core::{error::BridgeError, message::ConversationId, traits::Session};

use super::send::{chat_jid, send_once};

/// One live bot: its client and the background task driving it.
pub struct WhatsAppSession {
    client: Arc<Client>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WhatsAppSession {
    pub(super) fn new(client: Arc<Client>, task: JoinHandle<()>) -> Self {
        Self {
            client,
            task: Mutex::new(Some(task)),
        }
    }
}

#[async_trait]
impl Session for WhatsAppSession {
    async fn send_text(&self, to: &ConversationId, text: &str) -> Result<String, BridgeError> {
        let jid = chat_jid(to)?;
        let msg = waproto::whatsapp::Message {
            conversation: Some(text.to_string()),
            ..Default::default()
        };
        let id = send_once(&self.client, &jid, msg).await?;
        debug!("sent text {id} to {to}");
        Ok(id)
    }

    async fn send_image(
        &self,
        to: &ConversationId,
        bytes: Vec<u8>,
        mimetype: &str,
        caption: Option<&str>,
    ) -> Result<String, BridgeError> {
        let jid = chat_jid(to)?;
        let upload = self
            .client
            .upload(bytes, MediaType::Image)
            .await
            .map_err(|e| BridgeError::Session(format!("whatsapp image upload failed: {e}")))?;

        let msg = waproto::whatsapp::Message {
            image_message: Some(Box::new(ImageMessage {
                mimetype: Some(mimetype.to_string()),
                caption: caption.map(str::to_string),
                url: Some(upload.url),
                direct_path: Some(upload.direct_path),
                media_key: Some(upload.media_key),
                file_enc_sha256: Some(upload.file_enc_sha256),
                file_sha256: Some(upload.file_sha256),
                file_length: Some(upload.file_length),
                ..Default::default()
            })),
            ..Default::default()
        };
        let id = send_once(&self.client, &jid, msg).await?;
        debug!("sent image {id} to {to}");
        Ok(id)
    }

    async fn send_document(
        &self,
        to: &ConversationId,
        bytes: Vec<u8>,
        file_name: &str,
        mimetype: &str,
        caption: Option<&str>,
    ) -> Result<String, BridgeError> {
        let jid = chat_jid(to)?;
        let upload = self
            .client
            .upload(bytes, MediaType::Document)
            .await
            .map_err(|e| BridgeError::Session(format!("whatsapp document upload failed: {e}")))?;

        let msg = waproto::whatsapp::Message {
            document_message: Some(Box::new(DocumentMessage {
                mimetype: Some(mimetype.to_string()),
                file_name: Some(file_name.to_string()),
                title: Some(file_name.to_string()),
                caption: caption.map(str::to_string),
                url: Some(upload.url),
                direct_path: Some(upload.direct_path),
                media_key: Some(upload.media_key),
                file_enc_sha256: Some(upload.file_enc_sha256),
                file_sha256: Some(upload.file_sha256),
                file_length: Some(upload.file_length),
                ..Default::default()
            })),
            ..Default::default()
        };
        let id = send_once(&self.client, &jid, msg).await?;
        debug!("sent document {id} to {to}");
        Ok(id)
    }

    async fn set_typing(&self, to: &ConversationId, typing: bool) -> Result<(), BridgeError> {
        let jid = chat_jid(to)?;
        let chatstate = self.client.chatstate();
        let result = if typing {
            chatstate.send_composing(&jid).await
        } else {
            chatstate.send_paused(&jid).await
        };
        result.map_err(|e| BridgeError::Session(format!("whatsapp chatstate failed: {e}")))
    }

    async fn mark_read(
        &self,
        chat: &ConversationId,
        message_ids: &[String],
    ) -> Result<(), BridgeError> {
        let jid = chat_jid(chat)?;
        self.client
            .mark_as_read(&jid, None, message_ids.to_vec())
            .await
            .map_err(|e| BridgeError::Session(format!("whatsapp read receipt failed: {e}")))
    }

    async fn logout(&self) -> Result<(), BridgeError> {
        info!("requesting whatsapp logout");
        self.client
            .logout()
            .await
            .map_err(|e| BridgeError::Session(format!("whatsapp logout failed: {e}")))
    }

    async fn shutdown(&self) {
        self.client.disconnect().await;
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            task.abort();
        }
        debug!("whatsapp session shut down");
    }
}
