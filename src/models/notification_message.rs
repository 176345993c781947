//! One logical operator notification, owned by the notifier from creation until
//! it is delivered or dead-lettered.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::constants::NotificationKind;

/// Rendered content: a human line plus the structured fields it was built from
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub text: String,
    pub fields: BTreeMap<String, String>,
}

impl NotificationPayload {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: impl ToString) -> Self {
        self.fields.insert(key.to_string(), value.to_string());
        self
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationMessage {
    /// Stable across retries and restarts; transports dedup on it
    pub message_id: String,
    /// Absent for messages not tied to an admitted deployment (CONCURRENT_WAIT)
    pub correlation_id: Option<String>,
    pub kind: NotificationKind,
    pub payload: NotificationPayload,
    pub attempt_count: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl NotificationMessage {
    pub fn new(
        correlation_id: Option<String>,
        kind: NotificationKind,
        payload: NotificationPayload,
    ) -> Self {
        let now = Utc::now();
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            correlation_id,
            kind,
            payload,
            attempt_count: 0,
            next_attempt_at: now,
            created_at: now,
            last_error: None,
        }
    }

    /// Reset retry bookkeeping for a manual replay, keeping the same id
    pub(crate) fn reset_for_replay(&mut self) {
        self.attempt_count = 0;
        self.next_attempt_at = Utc::now();
        self.last_error = None;
    }
}
