//! History writes guarded by the duplicate-write window.

use super::Gateway;
use tracing::{debug, error};
use wabridge_core::message::{ChatEntry, ConversationId};

/// Outcome of a history write. Failures are logged, never propagated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    Written,
    /// An identical write landed inside the dedup window.
    Duplicate,
    Failed,
}

impl Gateway {
    pub(crate) async fn record(&self, conversation: &ConversationId, entry: ChatEntry) -> Recorded {
        if self
            .dedup
            .should_suppress_write(conversation, &entry.text, entry.direction)
        {
            return Recorded::Duplicate;
        }

        match self.history.append(conversation, entry).await {
            Ok(len) => {
                debug!("history for {conversation} now holds {len} entries");
                Recorded::Written
            }
            Err(e) => {
                error!("failed to save history for {conversation}: {e}");
                Recorded::Failed
            }
        }
    }
}
