//! # Event Publisher
//!
//! Broadcast fan-out of deployment events, optionally feeding the notifier.
//!
//! ```rust
//! use shipyard_core::events::{DeploymentEvent, EventPublisher};
//!
//! # tokio_test::block_on(async {
//! let publisher = EventPublisher::new(16);
//! let mut events = publisher.subscribe();
//!
//! publisher
//!     .publish(DeploymentEvent::Failed {
//!         correlation_id: "abc".to_string(),
//!         reason: "UPDATE_ROLLBACK_COMPLETE".to_string(),
//!     })
//!     .unwrap();
//!
//! let received = events.recv().await.unwrap();
//! assert_eq!(received.name, "deployment.failed");
//! # });
//! ```

use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::types::DeploymentEvent;
use crate::notification::{render_event, NotifierHandle};

/// Fan-out point for deployment lifecycle events.
///
/// Every event goes to in-process subscribers over a broadcast channel and, when
/// a notifier is attached, is rendered and enqueued for operator delivery.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
    notifier: Option<NotifierHandle>,
}

/// Event that has been published
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub name: &'static str,
    pub event: DeploymentEvent,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            notifier: None,
        }
    }

    /// Also forward every event to the notifier
    pub fn with_notifier(mut self, notifier: NotifierHandle) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Publish an event. Never blocks; an unreachable notifier is reported, not fatal.
    pub fn publish(&self, event: DeploymentEvent) -> Result<(), PublishError> {
        let published = PublishedEvent {
            name: event.name(),
            event: event.clone(),
            published_at: chrono::Utc::now(),
        };

        // no subscribers is fine
        let _ = self.sender.send(published);

        debug!(
            correlation_id = event.correlation_id(),
            event = event.name(),
            "Published deployment event"
        );

        if let Some(notifier) = &self.notifier {
            notifier
                .enqueue(render_event(&event))
                .map_err(|e| PublishError::NotifierUnavailable(e.to_string()))?;
        }
        Ok(())
    }

    /// Publish and log instead of returning a failure. Used on observability paths
    /// that must never fail the deployment.
    pub fn publish_or_log(&self, event: DeploymentEvent) {
        let correlation_id = event.correlation_id().map(str::to_owned);
        let name = event.name();
        if let Err(e) = self.publish(event) {
            warn!(
                correlation_id = correlation_id.as_deref(),
                event = name,
                error = %e,
                "Failed to forward deployment event"
            );
        }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Error types for event publishing
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Notifier is not accepting messages: {0}")]
    NotifierUnavailable(String),
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}
