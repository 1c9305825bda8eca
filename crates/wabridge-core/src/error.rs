use thiserror::Error;

/// Top-level error type for the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Error from the protocol session (transport, send, logout).
    #[error("session error: {0}")]
    Session(String),

    /// No live protocol session to carry the request.
    #[error("whatsapp session not connected")]
    NotConnected,

    /// Media retrieval or transformation error.
    #[error("media error: {0}")]
    Media(String),

    /// Chat history or credential persistence error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Outbound automation endpoint error.
    #[error("webhook error: {0}")]
    Webhook(String),

    /// Malformed caller input, rejected before any protocol call.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
