//! Timing of one finished deployment, used by the estimator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::utils::serde::{duration_map_millis, duration_millis};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleOutcome {
    Completed,
    Failed,
}

/// Immutable once written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalSample {
    pub target_name: String,
    #[serde(with = "duration_millis")]
    pub total_duration: Duration,
    /// Resource kind -> summed duration of that kind's finished resource events
    #[serde(with = "duration_map_millis", default)]
    pub per_resource_durations: BTreeMap<String, Duration>,
    pub outcome: SampleOutcome,
    pub recorded_at: DateTime<Utc>,
}

impl HistoricalSample {
    pub fn new(
        target_name: impl Into<String>,
        total_duration: Duration,
        per_resource_durations: BTreeMap<String, Duration>,
        outcome: SampleOutcome,
    ) -> Self {
        Self {
            target_name: target_name.into(),
            total_duration,
            per_resource_durations,
            outcome,
            recorded_at: Utc::now(),
        }
    }

    pub fn completed(target_name: impl Into<String>, total_duration: Duration) -> Self {
        Self::new(
            target_name,
            total_duration,
            BTreeMap::new(),
            SampleOutcome::Completed,
        )
    }
}
