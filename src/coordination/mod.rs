//! # Coordination
//!
//! Admission control for deployments and the housekeeping that keeps the
//! registry from accumulating abandoned slots.
//!
//! ```text
//! caller ─▶ can_deploy / wait ─▶ register ─▶ (monitor) ─▶ cleanup
//!                                   │                        ▲
//!                                   └── CleanupGuard ────────┘ on every exit path
//!
//! MaintenanceService ─▶ purge_stale(retention) every purge_interval
//! ```

pub mod coordinator;
pub mod decision;
pub mod guard;
pub mod maintenance;

pub use coordinator::Coordinator;
pub use decision::{Admission, BlockingDeployment, Decision, DecisionReason};
pub use guard::CleanupGuard;
pub use maintenance::{MaintenanceHandle, MaintenanceService};
