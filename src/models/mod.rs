pub mod deployment_record;
pub mod historical_sample;
pub mod notification_message;

// Re-export core models for easy access
pub use deployment_record::{DeploymentRecord, DeploymentRequest};
pub use historical_sample::{HistoricalSample, SampleOutcome};
pub use notification_message::{NotificationMessage, NotificationPayload};
