//! # Notifications
//!
//! Rendering of deployment events into operator messages and their at-least-once
//! delivery over an unreliable transport.
//!
//! ```text
//! EventPublisher ──render_event──▶ NotifierHandle::enqueue
//!                                        │ (unbounded mpsc)
//!                                        ▼
//!                                  DeliveryWorker ──▶ NotificationTransport
//!                                        │ retries exhausted
//!                                        ▼
//!                                  DeadLetterSet (+ optional spool)
//! ```

pub mod dead_letter;
pub mod notifier;
pub mod render;
pub mod spool;
pub mod transport;

pub use dead_letter::{DeadLetterEntry, DeadLetterReason, DeadLetterSet};
pub use notifier::{Notifier, NotifierHandle, NotifierStatsSnapshot};
pub use render::render_event;
pub use spool::Spool;
pub use transport::{LogTransport, NotificationTransport, TransportError};
