//! Duplicate suppression.
//!
//! Two independent pools:
//! - **echo markers**: registered by the automated send path before the
//!   protocol send, consumed by the first matching self-originated event.
//!   No expiry.
//! - **write window**: remembers recent `(conversation, text, direction)`
//!   writes and rejects repeats inside the window. Best-effort; not persisted.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;
use wabridge_core::message::{ConversationId, Direction};

type EchoKey = (ConversationId, String);
type WriteKey = (ConversationId, String, Direction);

/// Process-wide duplicate guard. Create once at startup and share.
pub struct DedupGuard {
    window: Duration,
    /// Marker multiset: each registration matches exactly one echo.
    echoes: Mutex<HashMap<EchoKey, usize>>,
    recent: Mutex<HashMap<WriteKey, Instant>>,
}

impl DedupGuard {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            echoes: Mutex::new(HashMap::new()),
            recent: Mutex::new(HashMap::new()),
        }
    }

    /// Record that the automation path is about to send `text` to `conversation`.
    pub fn register_outbound(&self, conversation: &ConversationId, text: &str) {
        let mut echoes = self.echoes.lock().unwrap_or_else(|e| e.into_inner());
        *echoes
            .entry((conversation.clone(), text.to_string()))
            .or_insert(0) += 1;
    }

    /// Consume a matching echo marker. `true` means the event was authored by
    /// the automation path and must be neither stored nor forwarded.
    pub fn should_suppress_echo(&self, conversation: &ConversationId, text: &str) -> bool {
        self.take_marker(conversation, text)
    }

    /// Drop one marker for a send that never reached the protocol.
    pub fn withdraw_outbound(&self, conversation: &ConversationId, text: &str) {
        if self.take_marker(conversation, text) {
            debug!("withdrew echo marker for {conversation}");
        }
    }

    fn take_marker(&self, conversation: &ConversationId, text: &str) -> bool {
        let mut echoes = self.echoes.lock().unwrap_or_else(|e| e.into_inner());
        let key = (conversation.clone(), text.to_string());
        match echoes.get_mut(&key) {
            Some(count) if *count > 1 => {
                *count -= 1;
                true
            }
            Some(_) => {
                echoes.remove(&key);
                true
            }
            None => false,
        }
    }

    /// Check-and-register for the write window. `true` means an identical
    /// write happened within the window and this one must be skipped.
    pub fn should_suppress_write(
        &self,
        conversation: &ConversationId,
        text: &str,
        direction: Direction,
    ) -> bool {
        self.should_suppress_write_at(conversation, text, direction, Instant::now())
    }

    pub fn should_suppress_write_at(
        &self,
        conversation: &ConversationId,
        text: &str,
        direction: Direction,
        now: Instant,
    ) -> bool {
        let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        let window = self.window;
        recent.retain(|_, at| now.saturating_duration_since(*at) <= window);

        let key = (conversation.clone(), text.to_string(), direction);
        if recent.contains_key(&key) {
            debug!("suppressing duplicate write for {conversation}: {text}");
            return true;
        }
        recent.insert(key, now);
        false
    }

    /// Outstanding echo markers (sum of counts).
    pub fn pending_echoes(&self) -> usize {
        self.echoes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .sum()
    }
}
