//! Dead-letter set for notifications that exhausted their delivery attempts.
//!
//! Entries are held for manual inspection. They are never retried automatically;
//! an operator replays one explicitly through the notifier handle.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::NotificationMessage;

/// Why a message was dead-lettered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    /// Every configured attempt failed
    MaxAttemptsExceeded,

    /// Still pending when the notifier shut down without a spool to keep it
    ShutdownWithoutSpool,
}

impl DeadLetterReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MaxAttemptsExceeded => "max_attempts_exceeded",
            Self::ShutdownWithoutSpool => "shutdown_without_spool",
        }
    }
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub message: NotificationMessage,
    pub reason: DeadLetterReason,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub fn new(message: NotificationMessage, reason: DeadLetterReason) -> Self {
        Self {
            message,
            reason,
            dead_lettered_at: Utc::now(),
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message.message_id
    }
}

/// Insertion-ordered set of dead letters, keyed by message id
#[derive(Debug, Default)]
pub struct DeadLetterSet {
    entries: RwLock<Vec<DeadLetterEntry>>,
}

impl DeadLetterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<DeadLetterEntry>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Add an entry, replacing any previous entry for the same message id
    pub fn insert(&self, entry: DeadLetterEntry) {
        let mut entries = self.entries.write();
        entries.retain(|e| e.message_id() != entry.message_id());
        entries.push(entry);
    }

    pub fn get(&self, message_id: &str) -> Option<DeadLetterEntry> {
        self.entries
            .read()
            .iter()
            .find(|e| e.message_id() == message_id)
            .cloned()
    }

    /// Remove and return an entry, e.g. for replay
    pub fn take(&self, message_id: &str) -> Option<DeadLetterEntry> {
        let mut entries = self.entries.write();
        let position = entries.iter().position(|e| e.message_id() == message_id)?;
        Some(entries.remove(position))
    }

    pub fn list(&self) -> Vec<DeadLetterEntry> {
        self.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
