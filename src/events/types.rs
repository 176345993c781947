use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::constants::NotificationKind;
use crate::estimation::Estimate;

/// Lifecycle event raised by the coordinator, a monitor or a supervisor
#[derive(Debug, Clone, PartialEq)]
pub enum DeploymentEvent {
    Start {
        correlation_id: String,
        environment: String,
        target_name: String,
        started_at: DateTime<Utc>,
    },
    ConcurrentWait {
        environment: String,
        blocking_correlation_id: String,
        /// Remaining time of the blocking deployment
        estimated_wait: Estimate,
    },
    Progress {
        correlation_id: String,
        elapsed: Duration,
        estimate: Estimate,
    },
    Stalled {
        correlation_id: String,
        elapsed_since_last_event: Duration,
    },
    Completed {
        correlation_id: String,
        total_duration: Duration,
    },
    Failed {
        correlation_id: String,
        reason: String,
    },
    MonitoringDegraded {
        correlation_id: String,
        restarts: u32,
    },
}

impl DeploymentEvent {
    pub fn kind(&self) -> NotificationKind {
        match self {
            Self::Start { .. } => NotificationKind::Start,
            Self::ConcurrentWait { .. } => NotificationKind::ConcurrentWait,
            Self::Progress { .. } => NotificationKind::Progress,
            Self::Stalled { .. } => NotificationKind::Stalled,
            Self::Completed { .. } => NotificationKind::Completed,
            Self::Failed { .. } => NotificationKind::Failed,
            Self::MonitoringDegraded { .. } => NotificationKind::MonitoringDegraded,
        }
    }

    /// The deployment this event belongs to. A waiting caller has no id yet.
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Self::ConcurrentWait { .. } => None,
            Self::Start { correlation_id, .. }
            | Self::Progress { correlation_id, .. }
            | Self::Stalled { correlation_id, .. }
            | Self::Completed { correlation_id, .. }
            | Self::Failed { correlation_id, .. }
            | Self::MonitoringDegraded { correlation_id, .. } => Some(correlation_id),
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().event_name()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::events;

    #[test]
    fn test_event_names_match_constants() {
        let stalled = DeploymentEvent::Stalled {
            correlation_id: "abc".to_string(),
            elapsed_since_last_event: Duration::from_secs(601),
        };
        assert_eq!(stalled.name(), events::DEPLOYMENT_STALLED);
        assert_eq!(stalled.correlation_id(), Some("abc"));
        assert!(!stalled.is_terminal());

        let wait = DeploymentEvent::ConcurrentWait {
            environment: "production".to_string(),
            blocking_correlation_id: "abc".to_string(),
            estimated_wait: Estimate::Unknown {
                available: 0,
                required: 3,
            },
        };
        assert_eq!(wait.kind(), NotificationKind::ConcurrentWait);
        assert!(wait.correlation_id().is_none());
    }
}
