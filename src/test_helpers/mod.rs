//! Test doubles for the orchestrator feed and notification transports, plus small
//! builders shared by unit and integration tests.

pub mod feeds;
pub mod transports;

pub use feeds::{event_at, in_progress, FeedStep, ScriptedStatusFeed};
pub use transports::{FlakyTransport, RecordingTransport};

use std::path::Path;
use tokio::sync::broadcast;

use crate::config::ShipyardConfig;
use crate::events::{DeploymentEvent, PublishedEvent};

/// Defaults with every durable location under `dir`
pub fn test_config(dir: &Path) -> ShipyardConfig {
    let mut config = ShipyardConfig::default();
    config.registry.state_dir = dir.join("state");
    config.maintenance.enabled = false;
    config
}

/// Everything published so far, without waiting
pub fn drain_events(receiver: &mut broadcast::Receiver<PublishedEvent>) -> Vec<DeploymentEvent> {
    let mut events = Vec::new();
    while let Ok(published) = receiver.try_recv() {
        events.push(published.event);
    }
    events
}
