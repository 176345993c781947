#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Shipyard Core
//!
//! Deployment coordination and monitoring core.
//!
//! ## Overview
//!
//! Shipyard sits between a deployment trigger and a slow, eventually-consistent
//! infrastructure orchestrator. It does not provision anything itself. It:
//!
//! - guarantees at most one active deployment per environment
//! - tracks each deployment by polling the orchestrator, flagging stalls and
//!   reporting the terminal outcome exactly once
//! - estimates remaining time from the target's recent history
//! - delivers operator notifications at least once over an unreliable transport,
//!   dead-lettering what cannot be delivered
//!
//! ## Module Organization
//!
//! - [`registry`] - Durable per-environment deployment records (the mutual-exclusion primitive)
//! - [`coordination`] - Admission, waiting, cleanup and stale-record maintenance
//! - [`monitoring`] - Supervised polling loops over the orchestrator status feed
//! - [`estimation`] - Historical samples and remaining-time estimates
//! - [`notification`] - Rendering, retrying delivery and dead letters
//! - [`events`] - Lifecycle event fan-out
//! - [`system`] - Process-wide wiring with an explicit open/close lifecycle
//! - [`config`] - Layered configuration
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use shipyard_core::models::DeploymentRequest;
//! use shipyard_core::system::ShipyardSystem;
//! use std::time::Duration;
//!
//! # async fn example(system: &ShipyardSystem) -> shipyard_core::Result<()> {
//! let coordinator = system.coordinator();
//! coordinator
//!     .wait("production", "api-stack", Duration::from_secs(1800))
//!     .await?;
//!
//! let mut guard = coordinator
//!     .register_guarded(DeploymentRequest::new("production", "api-stack", "run-8841"))
//!     .await?;
//! guard.start().await?;
//! let monitor = system.monitor(guard.record().clone());
//!
//! // ... trigger the orchestrator ...
//!
//! let outcome = monitor.join().await;
//! println!("monitor finished: {outcome:?}");
//! guard.finish().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and integration tests
//! ```

pub mod config;
pub mod constants;
pub mod coordination;
pub mod error;
pub mod estimation;
pub mod events;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod monitoring;
pub mod notification;
pub mod registry;
pub mod system;
pub mod test_helpers;
pub mod utils;

pub use config::{ConfigManager, ShipyardConfig};
pub use constants::{system as system_constants, DeploymentStatus, NotificationKind};
// Re-export constants events with different name to avoid conflict
pub use constants::events as system_events;
pub use coordination::{Admission, CleanupGuard, Coordinator, Decision, DecisionReason};
pub use error::{Result, ShipyardError};
pub use estimation::{Estimate, Estimator, HistoricalStore};
pub use events::{DeploymentEvent, EventPublisher};
pub use models::{DeploymentRecord, DeploymentRequest, HistoricalSample, NotificationMessage};
pub use monitoring::{MonitorHandle, MonitorSupervisor, StatusFeed};
pub use notification::{NotificationTransport, NotifierHandle};
pub use registry::{FileRegistryStore, InMemoryRegistryStore, RegistryStore};
pub use system::ShipyardSystem;
