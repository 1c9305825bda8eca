//! File-backed chat history: one JSON array per conversation.
//!
//! Each conversation is `{dir}/{conversation_id}.json`. Every
//! read-modify-write holds that conversation's lock, and the file is
//! replaced atomically (temp file + fsync + rename).

use std::cmp::Ordering;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use wabridge_core::{
    config::{Config, MAX_HISTORY_ENTRIES},
    error::BridgeError,
    message::{ChatEntry, ConversationId, ConversationSummary, Direction},
};

/// Durable, bounded, per-conversation append log.
pub struct ChatHistoryStore {
    dir: PathBuf,
    max_entries: usize,
    locks: Mutex<HashMap<ConversationId, Arc<tokio::sync::Mutex<()>>>>,
}

impl ChatHistoryStore {
    /// Open (and create if needed) the history directory.
    pub fn new(dir: impl Into<PathBuf>, max_entries: usize) -> Result<Self, BridgeError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            BridgeError::Storage(format!("failed to create {}: {e}", dir.display()))
        })?;
        info!("Chat history at {}", dir.display());
        Ok(Self {
            dir,
            max_entries: max_entries.clamp(1, MAX_HISTORY_ENTRIES),
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, BridgeError> {
        Self::new(config.history_dir(), config.history.max_entries)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append one entry, evicting the oldest beyond the cap. Returns the new length.
    pub async fn append(
        &self,
        conversation: &ConversationId,
        entry: ChatEntry,
    ) -> Result<usize, BridgeError> {
        let lock = self.lock_for(conversation);
        let _guard = lock.lock().await;

        let path = self.path_for(conversation);
        let mut history = load(&path).await?;
        history.push(entry);
        if history.len() > self.max_entries {
            let overflow = history.len() - self.max_entries;
            history.drain(..overflow);
        }
        save(&path, &history).await?;

        debug!("history {conversation}: appended, {} entries", history.len());
        Ok(history.len())
    }

    /// Full ordered record, empty if none exists.
    pub async fn read(
        &self,
        conversation: &ConversationId,
    ) -> Result<Vec<ChatEntry>, BridgeError> {
        let lock = self.lock_for(conversation);
        let _guard = lock.lock().await;
        load(&self.path_for(conversation)).await
    }

    /// Set `read` on every incoming entry. Returns how many changed; the
    /// file is left untouched when nothing did.
    pub async fn mark_all_read(
        &self,
        conversation: &ConversationId,
    ) -> Result<usize, BridgeError> {
        let lock = self.lock_for(conversation);
        let _guard = lock.lock().await;

        let path = self.path_for(conversation);
        let mut history = load(&path).await?;
        let mut changed = 0;
        for entry in history.iter_mut().filter(|e| e.is_unread()) {
            entry.read = true;
            changed += 1;
        }
        if changed > 0 {
            save(&path, &history).await?;
        }
        Ok(changed)
    }

    /// Summaries for every stored conversation, newest activity first;
    /// conversations with no entries sort last.
    pub async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, BridgeError> {
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(d) => d,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut summaries = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Ok(conversation) = ConversationId::parse(stem) else {
                debug!("skipping non-conversation file {}", path.display());
                continue;
            };
            match self.read(&conversation).await {
                Ok(history) => summaries.push(summarize(&conversation, &history)),
                Err(e) => warn!("skipping unreadable history {}: {e}", path.display()),
            }
        }

        summaries.sort_by(|a, b| match (a.last_timestamp, b.last_timestamp) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });
        Ok(summaries)
    }

    fn path_for(&self, conversation: &ConversationId) -> PathBuf {
        self.dir.join(format!("{conversation}.json"))
    }

    /// The conversation's lock. Locks nobody holds or awaits are dropped here,
    /// so the map only tracks conversations with work in flight.
    fn lock_for(&self, conversation: &ConversationId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(conversation.clone()).or_default().clone()
    }
}

/// Incoming entries not yet marked read.
pub fn unread_count(history: &[ChatEntry]) -> usize {
    history.iter().filter(|e| e.is_unread()).count()
}

fn summarize(conversation: &ConversationId, history: &[ChatEntry]) -> ConversationSummary {
    let number = conversation.as_str();
    let contact_name = history
        .iter()
        .rev()
        .find(|e| {
            e.direction == Direction::Incoming
                && !e.display_name.is_empty()
                && e.display_name != number
        })
        .map(|e| e.display_name.clone())
        .unwrap_or_else(|| number.to_string());
    let last = history.last();

    ConversationSummary {
        number: number.to_string(),
        contact_name,
        last_message: last.map(|e| e.text.clone()).unwrap_or_default(),
        last_timestamp: last.map(|e| e.timestamp),
        message_count: history.len(),
        unread_count: unread_count(history),
    }
}

async fn load(path: &Path) -> Result<Vec<ChatEntry>, BridgeError> {
    let data = match fs::read(path).await {
        Ok(d) => d,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(BridgeError::Storage(format!(
                "failed to read {}: {e}",
                path.display()
            )))
        }
    };
    serde_json::from_slice(&data).map_err(|e| {
        BridgeError::Storage(format!("corrupt history {}: {e}", path.display()))
    })
}

async fn save(path: &Path, history: &[ChatEntry]) -> Result<(), BridgeError> {
    let data = serde_json::to_vec_pretty(history)?;
    atomic_write_file(path, &data).await
}

/// Write to a uniquely named temp file, fsync, then rename over `final_path`.
async fn atomic_write_file(final_path: &Path, data: &[u8]) -> Result<(), BridgeError> {
    let file_name = final_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("history");
    let temp_path = final_path.with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4()));
    let io_err =
        |p: &Path, e: std::io::Error| BridgeError::Storage(format!("{}: {e}", p.display()));

    let mut file = fs::File::create(&temp_path)
        .await
        .map_err(|e| io_err(&temp_path, e))?;
    file.write_all(data).await.map_err(|e| io_err(&temp_path, e))?;
    file.sync_all().await.map_err(|e| io_err(&temp_path, e))?;
    drop(file);
    if let Err(e) = fs::rename(&temp_path, final_path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(io_err(final_path, e));
    }
    Ok(())
}
