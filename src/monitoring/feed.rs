//! External orchestrator status feed.
//!
//! The orchestrator is only pollable. Anything that can answer
//! [`StatusFeed::fetch_status`] can drive a monitor, so a push-based source only
//! needs to cache its latest state behind this trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use crate::config::FeedConfig;

/// What to ask the orchestrator about
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeedQuery {
    pub target_name: String,
    pub external_run_ref: Option<String>,
}

impl FeedQuery {
    pub fn for_target(target_name: impl Into<String>) -> Self {
        Self {
            target_name: target_name.into(),
            external_run_ref: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEvent {
    pub kind: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl ResourceEvent {
    pub fn duration(&self) -> Option<Duration> {
        let ended_at = self.ended_at?;
        (ended_at - self.started_at).to_std().ok()
    }
}

/// One poll's answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalStatus {
    /// Raw orchestrator status string
    pub status: String,
    /// Most recent external state-change event
    pub last_event_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resource_events: Vec<ResourceEvent>,
}

impl ExternalStatus {
    pub fn new(status: impl Into<String>, last_event_at: Option<DateTime<Utc>>) -> Self {
        Self {
            status: status.into(),
            last_event_at,
            resource_events: Vec::new(),
        }
    }

    pub fn with_resource_event(mut self, event: ResourceEvent) -> Self {
        self.resource_events.push(event);
        self
    }

    /// Finished resource durations summed per kind
    pub fn per_resource_durations(&self) -> BTreeMap<String, Duration> {
        let mut totals: BTreeMap<String, Duration> = BTreeMap::new();
        for event in &self.resource_events {
            if let Some(duration) = event.duration() {
                *totals.entry(event.kind.clone()).or_default() += duration;
            }
        }
        totals
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    /// Network, throttling or short-lived auth trouble
    #[error("transient feed error: {0}")]
    Transient(String),

    /// The orchestrator does not know the target
    #[error("target not found: {0}")]
    NotFound(String),
}

#[async_trait]
pub trait StatusFeed: Send + Sync + std::fmt::Debug {
    async fn fetch_status(&self, query: &FeedQuery) -> Result<ExternalStatus, FeedError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalOutcome {
    InProgress,
    Succeeded,
    Failed,
}

impl ExternalOutcome {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

/// Success and failure vocabularies of the orchestrator. Any status outside both
/// sets is treated as still running.
#[derive(Debug, Clone)]
pub struct TerminalStatusSet {
    success: HashSet<String>,
    failure: HashSet<String>,
}

impl TerminalStatusSet {
    pub fn new<I, J, S, T>(success: I, failure: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        Self {
            success: success.into_iter().map(|s| normalize(s.as_ref())).collect(),
            failure: failure.into_iter().map(|s| normalize(s.as_ref())).collect(),
        }
    }

    pub fn from_config(config: &FeedConfig) -> Self {
        Self::new(&config.success_statuses, &config.failure_statuses)
    }

    pub fn classify(&self, status: &str) -> ExternalOutcome {
        let status = normalize(status);
        if self.success.contains(&status) {
            ExternalOutcome::Succeeded
        } else if self.failure.contains(&status) {
            ExternalOutcome::Failed
        } else {
            ExternalOutcome::InProgress
        }
    }
}

impl Default for TerminalStatusSet {
    fn default() -> Self {
        Self::from_config(&FeedConfig::default())
    }
}

fn normalize(status: &str) -> String {
    status.trim().to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_uses_configured_vocabulary() {
        let set = TerminalStatusSet::default();
        assert_eq!(set.classify("UPDATE_COMPLETE"), ExternalOutcome::Succeeded);
        assert_eq!(set.classify("success"), ExternalOutcome::Succeeded);
        assert_eq!(set.classify("ROLLBACK_COMPLETE"), ExternalOutcome::Failed);
        assert_eq!(
            set.classify("UPDATE_IN_PROGRESS"),
            ExternalOutcome::InProgress
        );
        assert_eq!(set.classify("SOMETHING_NEW"), ExternalOutcome::InProgress);
    }

    #[test]
    fn test_per_resource_durations_sum_finished_events() {
        let t0 = Utc::now();
        let status = ExternalStatus::new("UPDATE_IN_PROGRESS", Some(t0))
            .with_resource_event(ResourceEvent {
                kind: "database".to_string(),
                started_at: t0,
                ended_at: Some(t0 + chrono::Duration::seconds(120)),
            })
            .with_resource_event(ResourceEvent {
                kind: "database".to_string(),
                started_at: t0,
                ended_at: Some(t0 + chrono::Duration::seconds(30)),
            })
            .with_resource_event(ResourceEvent {
                kind: "service".to_string(),
                started_at: t0,
                ended_at: None,
            });

        let totals = status.per_resource_durations();
        assert_eq!(totals.get("database"), Some(&Duration::from_secs(150)));
        assert!(!totals.contains_key("service"));
    }
}
