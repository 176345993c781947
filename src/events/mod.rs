pub mod publisher;
pub mod types;

pub use publisher::{EventPublisher, PublishError, PublishedEvent};
pub use types::DeploymentEvent;
