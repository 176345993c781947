//! Rendering of deployment events into operator-facing messages.

use crate::events::DeploymentEvent;
use crate::models::{NotificationMessage, NotificationPayload};
use crate::utils::format_duration;

/// Build the notification for an event. Each call yields a fresh `message_id`.
pub fn render_event(event: &DeploymentEvent) -> NotificationMessage {
    let payload = match event {
        DeploymentEvent::Start {
            correlation_id,
            environment,
            target_name,
            started_at,
        } => NotificationPayload::new(format!(
            "Deployment of {target_name} to {environment} started"
        ))
        .with_field("correlation_id", correlation_id)
        .with_field("environment", environment)
        .with_field("target_name", target_name)
        .with_field("started_at", started_at.to_rfc3339()),

        DeploymentEvent::ConcurrentWait {
            environment,
            blocking_correlation_id,
            estimated_wait,
        } => NotificationPayload::new(format!(
            "Waiting for {environment}: deployment {blocking_correlation_id} is in progress, estimated wait {}",
            estimated_wait.render()
        ))
        .with_field("environment", environment)
        .with_field("blocking_correlation_id", blocking_correlation_id)
        .with_field("estimated_wait", estimated_wait.render()),

        DeploymentEvent::Progress {
            correlation_id,
            elapsed,
            estimate,
        } => NotificationPayload::new(format!(
            "Deployment {correlation_id} running for {}, remaining {}",
            format_duration(*elapsed),
            estimate.render()
        ))
        .with_field("correlation_id", correlation_id)
        .with_field("elapsed", format_duration(*elapsed))
        .with_field("estimate", estimate.render()),

        DeploymentEvent::Stalled {
            correlation_id,
            elapsed_since_last_event,
        } => NotificationPayload::new(format!(
            "Deployment {correlation_id} has reported no progress for {}",
            format_duration(*elapsed_since_last_event)
        ))
        .with_field("correlation_id", correlation_id)
        .with_field(
            "elapsed_since_last_event",
            format_duration(*elapsed_since_last_event),
        ),

        DeploymentEvent::Completed {
            correlation_id,
            total_duration,
        } => NotificationPayload::new(format!(
            "Deployment {correlation_id} completed in {}",
            format_duration(*total_duration)
        ))
        .with_field("correlation_id", correlation_id)
        .with_field("total_duration", format_duration(*total_duration)),

        DeploymentEvent::Failed {
            correlation_id,
            reason,
        } => NotificationPayload::new(format!("Deployment {correlation_id} failed: {reason}"))
            .with_field("correlation_id", correlation_id)
            .with_field("reason", reason),

        DeploymentEvent::MonitoringDegraded {
            correlation_id,
            restarts,
        } => NotificationPayload::new(format!(
            "Monitoring of deployment {correlation_id} stopped after {restarts} restarts; the deployment itself continues"
        ))
        .with_field("correlation_id", correlation_id)
        .with_field("restarts", restarts),
    };

    NotificationMessage::new(
        event.correlation_id().map(str::to_owned),
        event.kind(),
        payload,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::NotificationKind;
    use crate::estimation::Estimate;
    use std::time::Duration;

    #[test]
    fn test_concurrent_wait_carries_required_fields() {
        let message = render_event(&DeploymentEvent::ConcurrentWait {
            environment: "production".to_string(),
            blocking_correlation_id: "abc".to_string(),
            estimated_wait: Estimate::Unknown {
                available: 1,
                required: 3,
            },
        });
        assert_eq!(message.kind, NotificationKind::ConcurrentWait);
        assert!(message.correlation_id.is_none());
        assert_eq!(message.payload.field("environment"), Some("production"));
        assert_eq!(message.payload.field("blocking_correlation_id"), Some("abc"));
        assert_eq!(
            message.payload.field("estimated_wait"),
            Some("insufficient data")
        );
    }

    #[test]
    fn test_completed_renders_duration() {
        let message = render_event(&DeploymentEvent::Completed {
            correlation_id: "abc".to_string(),
            total_duration: Duration::from_secs(725),
        });
        assert_eq!(message.correlation_id.as_deref(), Some("abc"));
        assert_eq!(message.payload.field("total_duration"), Some("12m 05s"));
        assert_eq!(message.attempt_count, 0);
    }

    #[test]
    fn test_each_render_gets_a_new_message_id() {
        let event = DeploymentEvent::Failed {
            correlation_id: "abc".to_string(),
            reason: "UPDATE_ROLLBACK_COMPLETE".to_string(),
        };
        assert_ne!(
            render_event(&event).message_id,
            render_event(&event).message_id
        );
    }
}
