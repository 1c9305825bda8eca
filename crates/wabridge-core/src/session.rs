//! Protocol-facing session types: connection state, closure reasons, and
//! the generation-tagged event stream a live session feeds.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::traits::MediaSource;

/// Process-wide connection state. Owned by the supervisor, read by everyone else.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// Handshake in progress; `qr` is the latest pairing challenge, if any.
    Connecting { qr: Option<String> },
    /// Authenticated; `identity` is the connected account's number.
    Connected { identity: Option<String> },
}

impl ConnectionState {
    pub fn phase(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting { .. } => "connecting",
            Self::Connected { .. } => "connected",
        }
    }

    pub fn qr(&self) -> Option<&str> {
        match self {
            Self::Connecting { qr } => qr.as_deref(),
            _ => None,
        }
    }

    pub fn identity(&self) -> Option<&str> {
        match self {
            Self::Connected { identity } => identity.as_deref(),
            _ => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    pub fn report(&self) -> StatusReport {
        StatusReport {
            status: self.phase(),
            number: self.identity().map(str::to_string),
            qr: self.qr().map(str::to_string),
        }
    }
}

/// Serializable view of [`ConnectionState`].
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatusReport {
    pub status: &'static str,
    pub number: Option<String>,
    pub qr: Option<String>,
}

/// Why a session closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The account unlinked this device.
    LoggedOut,
    /// The server rejected the stored credentials.
    AuthInvalid,
    Transient(String),
}

impl CloseReason {
    /// Map a protocol status code (401 logged out, 403 rejected).
    pub fn from_status_code(code: Option<u16>, detail: impl Into<String>) -> Self {
        match code {
            Some(401) => Self::LoggedOut,
            Some(403) => Self::AuthInvalid,
            _ => Self::Transient(detail.into()),
        }
    }

    /// Whether the stored credentials must be discarded before restarting.
    pub fn requires_fresh_credentials(&self) -> bool {
        matches!(self, Self::LoggedOut | Self::AuthInvalid)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoggedOut => f.write_str("logged out"),
            Self::AuthInvalid => f.write_str("credentials rejected"),
            Self::Transient(detail) => write!(f, "transient: {detail}"),
        }
    }
}

/// Descriptor of one media-bearing content field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaPayload {
    pub caption: Option<String>,
    pub mimetype: Option<String>,
    pub file_name: Option<String>,
    /// Push-to-talk flag on audio messages.
    pub voice_note: bool,
}

/// Content fields of a protocol message, already unwrapped from
/// device-sent/ephemeral/view-once envelopes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawContent {
    /// First content field name as reported by the protocol (e.g. `conversation`).
    pub tag: String,
    pub image: Option<MediaPayload>,
    pub audio: Option<MediaPayload>,
    pub video: Option<MediaPayload>,
    pub document: Option<MediaPayload>,
    pub conversation: Option<String>,
    pub extended_text: Option<String>,
}

/// One message as reported by the protocol, before classification.
#[derive(Clone)]
pub struct InboundMessage {
    /// Chat address as reported (e.g. `628123@s.whatsapp.net`).
    pub chat: String,
    pub message_id: String,
    pub from_me: bool,
    pub push_name: Option<String>,
    pub content: RawContent,
    /// Handle for fetching media bytes; `None` for text-only messages.
    pub media: Option<Arc<dyn MediaSource>>,
}

impl fmt::Debug for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundMessage")
            .field("chat", &self.chat)
            .field("message_id", &self.message_id)
            .field("from_me", &self.from_me)
            .field("push_name", &self.push_name)
            .field("content", &self.content)
            .field("media", &self.media.is_some())
            .finish()
    }
}

/// Events emitted by a live session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Qr(String),
    Connected { identity: Option<String> },
    Closed(CloseReason),
    Message(InboundMessage),
}

/// Sender half handed to each session attempt. Every event is tagged with
/// the attempt's generation so the supervisor can drop events from
/// superseded sessions.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::Sender<(u64, SessionEvent)>,
}

impl EventSink {
    pub fn new(generation: u64, tx: mpsc::Sender<(u64, SessionEvent)>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns `false` once the supervisor has gone away.
    pub async fn emit(&self, event: SessionEvent) -> bool {
        self.tx.send((self.generation, event)).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_reason_codes() {
        assert_eq!(CloseReason::from_status_code(Some(401), ""), CloseReason::LoggedOut);
        assert_eq!(CloseReason::from_status_code(Some(403), ""), CloseReason::AuthInvalid);
        let other = CloseReason::from_status_code(Some(428), "connection closed");
        assert!(!other.requires_fresh_credentials());
        assert!(CloseReason::LoggedOut.requires_fresh_credentials());
        assert!(CloseReason::from_status_code(None, "eof") == CloseReason::Transient("eof".into()));
    }

    #[test]
    fn test_state_report() {
        let s = ConnectionState::Connecting {
            qr: Some("2@abc".into()),
        };
        let r = s.report();
        assert_eq!(r.status, "connecting");
        assert_eq!(r.qr.as_deref(), Some("2@abc"));
        assert!(r.number.is_none());

        let s = ConnectionState::Connected {
            identity: Some("628111".into()),
        };
        assert_eq!(s.qr(), None);
        assert_eq!(s.report().number.as_deref(), Some("628111"));
        assert!(s.is_connected());
    }

    #[tokio::test]
    async fn test_sink_tags_generation() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = EventSink::new(7, tx);
        assert!(sink.emit(SessionEvent::Qr("q".into())).await);
        let (generation, event) = rx.recv().await.unwrap();
        assert_eq!(generation, 7);
        assert!(matches!(event, SessionEvent::Qr(ref q) if q == "q"));
        drop(rx);
        assert!(!sink.emit(SessionEvent::Qr("q".into())).await);
    }
}
