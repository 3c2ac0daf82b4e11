//! Console log of bridge activity
//!
//! Every handled method and adapter event lands here as a structured entry.
//! The surrounding UI renders the log; the CLI prints it.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

/// Kind of console entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConsoleEntryType {
    CallTool,
    SetWidgetState,
    RequestDisplayMode,
    SendFollowUpMessage,
    RequestClose,
    OpenExternal,
    NotifyIntrinsicHeight,
    RequestModal,
    UploadFile,
    GetFileDownloadUrl,
    Event,
}

/// A single console entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsoleEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub entry_type: ConsoleEntryType,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

/// Ordered, append-only console log with a live feed
#[derive(Debug)]
pub struct ConsoleLog {
    entries: RwLock<Vec<ConsoleEntry>>,
    next_id: AtomicU64,
    feed: broadcast::Sender<ConsoleEntry>,
}

impl Default for ConsoleLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleLog {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            feed: broadcast::channel(128).0,
        }
    }

    /// Append an entry and return its id
    pub fn push(
        &self,
        entry_type: ConsoleEntryType,
        method: impl Into<String>,
        args: Option<Value>,
        result: Option<Value>,
    ) -> u64 {
        let entry = ConsoleEntry {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            timestamp: Utc::now(),
            entry_type,
            method: method.into(),
            args,
            result,
        };
        tracing::debug!(id = entry.id, kind = ?entry.entry_type, method = %entry.method, "console entry");
        let id = entry.id;
        self.entries.write().push(entry.clone());
        // Nobody tailing the feed is fine.
        let _ = self.feed.send(entry);
        id
    }

    /// Subscribe to entries as they are appended
    pub fn subscribe(&self) -> broadcast::Receiver<ConsoleEntry> {
        self.feed.subscribe()
    }

    pub fn entries(&self) -> Vec<ConsoleEntry> {
        self.entries.read().clone()
    }

    /// Entries of one kind, in order
    pub fn entries_of(&self, entry_type: ConsoleEntryType) -> Vec<ConsoleEntry> {
        self.entries
            .read()
            .iter()
            .filter(|entry| entry.entry_type == entry_type)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
