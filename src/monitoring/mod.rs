//! # Deployment Monitoring
//!
//! One supervised polling loop per admitted deployment, observing the external
//! orchestrator through [`StatusFeed`].
//!
//! ```text
//! MonitorSupervisor::spawn ──▶ supervise (task)
//!                                  │ restart on panic/error, within budget
//!                                  ▼
//!                          DeploymentMonitor::run (task per incarnation)
//!                                  │ poll every poll_interval
//!                                  ▼
//!                  PROGRESS* ─ STALLED? ─ COMPLETED | FAILED
//! ```

pub mod feed;
pub mod monitor;
pub mod supervisor;

pub use feed::{
    ExternalOutcome, ExternalStatus, FeedError, FeedQuery, ResourceEvent, StatusFeed,
    TerminalStatusSet,
};
pub use monitor::{DeploymentMonitor, MonitorDependencies, MonitorOutcome};
pub use supervisor::{MonitorHandle, MonitorSupervisor};
