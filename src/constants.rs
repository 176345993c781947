//! # System Constants
//!
//! Status vocabularies and event names shared by the coordination, monitoring
//! and notification layers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Event names published on the [`crate::events::EventPublisher`]
pub mod events {
    pub const DEPLOYMENT_STARTED: &str = "deployment.started";
    pub const DEPLOYMENT_CONCURRENT_WAIT: &str = "deployment.concurrent_wait";
    pub const DEPLOYMENT_PROGRESS: &str = "deployment.progress";
    pub const DEPLOYMENT_STALLED: &str = "deployment.stalled";
    pub const DEPLOYMENT_COMPLETED: &str = "deployment.completed";
    pub const DEPLOYMENT_FAILED: &str = "deployment.failed";
    pub const MONITORING_DEGRADED: &str = "monitoring.degraded";
}

/// System-wide constants
pub mod system {
    /// Label used where a value is not known yet
    pub const UNKNOWN: &str = "unknown";

    /// Default environment name when none is detected
    pub const DEFAULT_ENVIRONMENT: &str = "development";

    /// Subdirectory of the state dir holding registry documents
    pub const REGISTRY_DIR: &str = "registry";

    /// Subdirectory of the state dir holding historical samples
    pub const HISTORY_DIR: &str = "history";

    /// Spool file for undelivered notifications
    pub const SPOOL_PENDING_FILE: &str = "pending.json";

    /// Spool file for dead-lettered notifications
    pub const SPOOL_DEAD_LETTER_FILE: &str = "dead_letters.json";
}

/// Lifecycle status of a deployment record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    Pending,
    InProgress,
    Stalled,
    Completed,
    Failed,
}

impl DeploymentStatus {
    /// Statuses that occupy the environment slot
    pub const ACTIVE: [DeploymentStatus; 3] = [Self::Pending, Self::InProgress, Self::Stalled];

    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::InProgress | Self::Stalled)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Self-transitions are accepted and only refresh `updated_at`.
    pub fn can_transition_to(self, next: DeploymentStatus) -> bool {
        use DeploymentStatus::*;
        if self == next {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Pending, Failed)
                | (InProgress, Stalled)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (Stalled, InProgress)
                | (Stalled, Completed)
                | (Stalled, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Stalled => "STALLED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kinds of operator notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    Start,
    ConcurrentWait,
    Progress,
    Stalled,
    Completed,
    Failed,
    MonitoringDegraded,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::ConcurrentWait => "CONCURRENT_WAIT",
            Self::Progress => "PROGRESS",
            Self::Stalled => "STALLED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::MonitoringDegraded => "MONITORING_DEGRADED",
        }
    }

    /// Name of the matching event on the publisher
    pub fn event_name(self) -> &'static str {
        match self {
            Self::Start => events::DEPLOYMENT_STARTED,
            Self::ConcurrentWait => events::DEPLOYMENT_CONCURRENT_WAIT,
            Self::Progress => events::DEPLOYMENT_PROGRESS,
            Self::Stalled => events::DEPLOYMENT_STALLED,
            Self::Completed => events::DEPLOYMENT_COMPLETED,
            Self::Failed => events::DEPLOYMENT_FAILED,
            Self::MonitoringDegraded => events::MONITORING_DEGRADED,
        }
    }

    /// Terminal kinds close a deployment's event stream
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase of a single deployment attempt as seen by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorPhase {
    Requested,
    Waiting,
    Admitted,
    Running,
    Done,
    Aborted,
}

impl CoordinatorPhase {
    pub fn can_transition_to(self, next: CoordinatorPhase) -> bool {
        use CoordinatorPhase::*;
        matches!(
            (self, next),
            (Requested, Waiting)
                | (Requested, Admitted)
                | (Waiting, Admitted)
                | (Waiting, Aborted)
                | (Admitted, Running)
                | (Admitted, Aborted)
                | (Running, Done)
                | (Running, Aborted)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_and_terminal_partition() {
        for status in [
            DeploymentStatus::Pending,
            DeploymentStatus::InProgress,
            DeploymentStatus::Stalled,
            DeploymentStatus::Completed,
            DeploymentStatus::Failed,
        ] {
            assert_ne!(status.is_active(), status.is_terminal(), "{status}");
        }
        assert_eq!(DeploymentStatus::ACTIVE.len(), 3);
    }

    #[test]
    fn test_status_transitions() {
        use DeploymentStatus::*;
        assert!(Pending.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Stalled));
        assert!(Stalled.can_transition_to(InProgress));
        assert!(Stalled.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(InProgress));
        assert!(!Failed.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Stalled));
        assert!(InProgress.can_transition_to(InProgress));
    }

    #[test]
    fn test_status_serde_uses_wire_names() {
        let json = serde_json::to_string(&DeploymentStatus::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");
        let kind: NotificationKind = serde_json::from_str("\"CONCURRENT_WAIT\"").unwrap();
        assert_eq!(kind, NotificationKind::ConcurrentWait);
    }

    #[test]
    fn test_coordinator_phase_lifecycle() {
        use CoordinatorPhase::*;
        assert!(Requested.can_transition_to(Waiting));
        assert!(Waiting.can_transition_to(Admitted));
        assert!(Admitted.can_transition_to(Running));
        assert!(Running.can_transition_to(Done));
        assert!(!Done.can_transition_to(Running));
        assert!(!Requested.can_transition_to(Running));
    }
}
