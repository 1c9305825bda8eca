use crate::{
    error::BridgeError,
    message::{ConversationId, MediaKind},
    session::EventSink,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Starts protocol sessions.
///
/// Each call produces one independent attempt. Events for the attempt go
/// through `sink`, tagged with its generation.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn start(&self, sink: EventSink) -> Result<Arc<dyn Session>, BridgeError>;
}

/// A live protocol session.
#[async_trait]
pub trait Session: Send + Sync {
    /// Send a text message. Returns the protocol message id.
    async fn send_text(&self, to: &ConversationId, text: &str) -> Result<String, BridgeError>;

    /// Send an image with an optional caption.
    async fn send_image(
        &self,
        to: &ConversationId,
        bytes: Vec<u8>,
        mimetype: &str,
        caption: Option<&str>,
    ) -> Result<String, BridgeError>;

    /// Send a file as a document.
    async fn send_document(
        &self,
        to: &ConversationId,
        bytes: Vec<u8>,
        file_name: &str,
        mimetype: &str,
        caption: Option<&str>,
    ) -> Result<String, BridgeError>;

    /// Typing indicator: `true` = composing, `false` = paused.
    async fn set_typing(&self, to: &ConversationId, typing: bool) -> Result<(), BridgeError>;

    /// Send read receipts for peer messages in a chat.
    async fn mark_read(
        &self,
        chat: &ConversationId,
        message_ids: &[String],
    ) -> Result<(), BridgeError>;

    /// Unlink this device from the account.
    async fn logout(&self) -> Result<(), BridgeError>;

    /// Tear down the connection. No further events are emitted afterwards.
    async fn shutdown(&self);
}

/// Opaque handle for downloading the bytes of one received message.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn download(&self, kind: MediaKind) -> Result<Vec<u8>, BridgeError>;
}

/// Durable session credentials.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Whether a paired device identity is stored.
    async fn exists(&self) -> Result<bool, BridgeError>;

    /// Remove everything. The next session starts with a fresh pairing.
    async fn erase(&self) -> Result<(), BridgeError>;
}
