use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::system;
use crate::models::DeploymentRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionReason {
    Free,
    Busy,
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Free => f.write_str("FREE"),
            Self::Busy => f.write_str("BUSY"),
        }
    }
}

/// What is occupying an environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockingDeployment {
    /// `"unknown"` when the registry was unreachable and the orchestrator was asked instead
    pub correlation_id: String,
    pub target_name: String,
    pub started_at: Option<DateTime<Utc>>,
    pub external_run_ref: Option<String>,
    /// Raw orchestrator status, set in degraded mode
    pub external_status: Option<String>,
}

impl BlockingDeployment {
    pub fn from_record(record: &DeploymentRecord) -> Self {
        Self {
            correlation_id: record.correlation_id.clone(),
            target_name: record.target_name.clone(),
            started_at: Some(record.started_at),
            external_run_ref: Some(record.external_run_ref.clone()),
            external_status: None,
        }
    }

    pub fn from_external(target_name: &str, external_status: &str) -> Self {
        Self {
            correlation_id: system::UNKNOWN.to_string(),
            target_name: target_name.to_string(),
            started_at: None,
            external_run_ref: None,
            external_status: Some(external_status.to_string()),
        }
    }

    /// Time the blocker has been running, when known
    pub fn elapsed(&self) -> Option<std::time::Duration> {
        self.started_at
            .and_then(|started| (Utc::now() - started).to_std().ok())
    }
}

/// Answer to "may a deployment start in this environment now?"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub allow: bool,
    pub reason: DecisionReason,
    pub blocking: Option<BlockingDeployment>,
    /// Taken from the orchestrator because the registry was unavailable
    pub degraded: bool,
}

impl Decision {
    pub fn free(degraded: bool) -> Self {
        Self {
            allow: true,
            reason: DecisionReason::Free,
            blocking: None,
            degraded,
        }
    }

    pub fn busy(blocking: BlockingDeployment, degraded: bool) -> Self {
        Self {
            allow: false,
            reason: DecisionReason::Busy,
            blocking: Some(blocking),
            degraded,
        }
    }

    pub fn blocking_correlation_id(&self) -> Option<&str> {
        self.blocking
            .as_ref()
            .map(|blocking| blocking.correlation_id.as_str())
    }
}

/// A deployment let into its environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub record: DeploymentRecord,
    /// False when admitted in degraded mode: the registry holds no record of it
    pub durable: bool,
}

impl Admission {
    pub fn correlation_id(&self) -> &str {
        &self.record.correlation_id
    }
}
