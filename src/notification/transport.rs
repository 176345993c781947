//! Delivery channel abstraction.
//!
//! A transport accepts arbitrary text and fields and reports success or failure
//! per call. Nothing beyond that return value is assumed: no receipts, no
//! server-side retries. Transports that deduplicate by `message_id` turn the
//! notifier's at-least-once delivery into effectively-once.

use async_trait::async_trait;
use tracing::info;

use crate::models::NotificationMessage;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("message rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait NotificationTransport: Send + Sync + std::fmt::Debug {
    async fn send(&self, message: &NotificationMessage) -> Result<(), TransportError>;

    /// Short name used in logs
    fn name(&self) -> &str;
}

/// Delivers notifications into the tracing log. Never fails.
#[derive(Debug, Default, Clone)]
pub struct LogTransport;

#[async_trait]
impl NotificationTransport for LogTransport {
    async fn send(&self, message: &NotificationMessage) -> Result<(), TransportError> {
        info!(
            correlation_id = message.correlation_id.as_deref(),
            message_id = %message.message_id,
            kind = %message.kind,
            fields = ?message.payload.fields,
            "{}",
            message.payload.text
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}
