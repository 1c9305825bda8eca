use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::BridgeError;

/// Protocol address suffix for one-to-one chats.
pub const USER_SERVER: &str = "s.whatsapp.net";

/// Normalized conversation identifier: the protocol address with its
/// domain suffix stripped (e.g. `6281234567890`).
///
/// Doubles as the history file stem, so only `[A-Za-z0-9._-]` is accepted
/// and a leading dot is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Parse a bare number or a full protocol address (`123@s.whatsapp.net`,
    /// `123:4@s.whatsapp.net`).
    pub fn parse(raw: &str) -> Result<Self, BridgeError> {
        let bare = raw.trim().split('@').next().unwrap_or_default();
        let bare = bare.split(':').next().unwrap_or_default();
        if bare.is_empty() {
            return Err(BridgeError::InvalidRequest(
                "conversation id is empty".into(),
            ));
        }
        if bare.starts_with('.')
            || !bare
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(BridgeError::InvalidRequest(format!(
                "invalid conversation id: {raw}"
            )));
        }
        Ok(Self(bare.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Full protocol address for a one-to-one chat.
    pub fn to_address(&self) -> String {
        format!("{}@{USER_SERVER}", self.0)
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who authored a message, relative to the connected account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// From the peer.
    Incoming,
    /// From the connected account (operator on the phone, or the automation path).
    Outgoing,
}

impl Direction {
    pub fn from_self(from_me: bool) -> Self {
        if from_me {
            Self::Outgoing
        } else {
            Self::Incoming
        }
    }

    pub fn is_outgoing(self) -> bool {
        self == Self::Outgoing
    }
}

/// Media kind tag stored alongside a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Voice,
    Audio,
    Video,
    Document,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Voice => "voice",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Document => "document",
        }
    }
}

/// Normalized content of one protocol message.
///
/// `media_url` is `None` when the bytes could not be materialized; the
/// placeholder text is still produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text {
        text: String,
    },
    Image {
        caption: Option<String>,
        media_url: Option<String>,
    },
    Voice {
        media_url: Option<String>,
    },
    Audio {
        media_url: Option<String>,
    },
    Video {
        caption: Option<String>,
        media_url: Option<String>,
    },
    Document {
        file_name: String,
        media_url: Option<String>,
    },
    Unrecognized,
}

impl Payload {
    /// Text stored in history and forwarded to webhooks.
    pub fn display_text(&self) -> String {
        match self {
            Self::Text { text } => text.clone(),
            Self::Image { caption, .. } => caption_or(caption, IMAGE_PLACEHOLDER),
            Self::Voice { .. } => "[Voice Note]".to_string(),
            Self::Audio { .. } => "[Audio]".to_string(),
            Self::Video { caption, .. } => caption_or(caption, "[Video]"),
            Self::Document { file_name, .. } => document_text(file_name),
            Self::Unrecognized => "[non-text]".to_string(),
        }
    }

    pub fn media_kind(&self) -> Option<MediaKind> {
        match self {
            Self::Image { .. } => Some(MediaKind::Image),
            Self::Voice { .. } => Some(MediaKind::Voice),
            Self::Audio { .. } => Some(MediaKind::Audio),
            Self::Video { .. } => Some(MediaKind::Video),
            Self::Document { .. } => Some(MediaKind::Document),
            Self::Text { .. } | Self::Unrecognized => None,
        }
    }

    pub fn media_url(&self) -> Option<&str> {
        match self {
            Self::Image { media_url, .. }
            | Self::Voice { media_url }
            | Self::Audio { media_url }
            | Self::Video { media_url, .. }
            | Self::Document { media_url, .. } => media_url.as_deref(),
            Self::Text { .. } | Self::Unrecognized => None,
        }
    }
}

pub const IMAGE_PLACEHOLDER: &str = "[Image]";

/// Caption if non-empty, else the placeholder.
pub fn caption_or(caption: &Option<String>, placeholder: &str) -> String {
    match caption.as_deref() {
        Some(c) if !c.is_empty() => c.to_string(),
        _ => placeholder.to_string(),
    }
}

/// Display text for a document message.
pub fn document_text(file_name: &str) -> String {
    format!("[Document] {file_name}")
}

/// One classified protocol event. Transient: persisted only as a [`ChatEntry`].
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub conversation: ConversationId,
    pub message_id: String,
    pub direction: Direction,
    /// Sender-supplied display name, if the protocol reported one.
    pub push_name: Option<String>,
    /// Protocol content tag (e.g. `imageMessage`), forwarded as-is.
    pub content_tag: String,
    pub payload: Payload,
}

impl InboundEvent {
    pub fn display_text(&self) -> String {
        self.payload.display_text()
    }
}

/// Delivery status recorded on a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Sent,
    Received,
}

/// One persisted history entry. Field names match the on-disk JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub id: String,
    #[serde(rename = "message")]
    pub text: String,
    #[serde(rename = "mediaUrl", default)]
    pub media_url: Option<String>,
    #[serde(rename = "mediaType", default)]
    pub media_type: Option<MediaKind>,
    pub direction: Direction,
    pub timestamp: DateTime<Utc>,
    pub status: EntryStatus,
    #[serde(rename = "pushname", default)]
    pub display_name: String,
    /// Set by the read-marking collaborator; only meaningful for incoming entries.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub read: bool,
}

impl ChatEntry {
    pub fn new(
        text: impl Into<String>,
        media_url: Option<String>,
        media_type: Option<MediaKind>,
        direction: Direction,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            text: text.into(),
            media_url,
            media_type,
            direction,
            timestamp: Utc::now(),
            status: match direction {
                Direction::Outgoing => EntryStatus::Sent,
                Direction::Incoming => EntryStatus::Received,
            },
            display_name: display_name.into(),
            read: false,
        }
    }

    pub fn is_unread(&self) -> bool {
        self.direction == Direction::Incoming && !self.read
    }
}

/// Per-conversation listing row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub number: String,
    /// Latest incoming sender name that differs from the number, else the number.
    pub contact_name: String,
    /// Text of the newest entry, empty when the record is empty.
    pub last_message: String,
    pub last_timestamp: Option<DateTime<Utc>>,
    pub message_count: usize,
    pub unread_count: usize,
}
