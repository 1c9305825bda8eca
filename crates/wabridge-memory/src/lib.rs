//! # wabridge-memory
//!
//! Per-conversation chat history on disk and in-process duplicate suppression.

pub mod dedup;
pub mod history;

pub use dedup::DedupGuard;
pub use history::ChatHistoryStore;
