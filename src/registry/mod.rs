//! # Deployment Registry
//!
//! Durable map of `environment -> DeploymentRecord` with a secondary index by
//! correlation id. The registry is the mutual-exclusion primitive of the system:
//! [`RegistryStore::put`] refuses a second active record for an environment.
//!
//! ## Available Stores
//!
//! - **FileRegistryStore**: one JSON document per environment, atomic rename on write
//! - **InMemoryRegistryStore**: process-local store with an availability switch for tests
//!
//! ## Architecture
//!
//! ```text
//! RegistryStore (trait)
//! ├── EnvironmentDocument   (pure put/remove/purge rules)
//! ├── FileRegistryStore     (durable, per-environment async lock)
//! └── InMemoryRegistryStore (tests, embedding)
//! ```
//!
//! Every mutation is a read-modify-write of a single environment document under
//! that environment's lock, so concurrent callers for the same environment are
//! serialized while different environments proceed independently.

pub mod document;
pub mod file_store;
pub mod in_memory;

use async_trait::async_trait;
use std::time::Duration;

use crate::constants::DeploymentStatus;
use crate::error::Result;
use crate::models::DeploymentRecord;

pub use document::EnvironmentDocument;
pub use file_store::FileRegistryStore;
pub use in_memory::InMemoryRegistryStore;

/// Storage contract for deployment records.
///
/// Any operation may fail with [`crate::ShipyardError::Unavailable`] when the
/// backing store cannot be reached or the store was closed.
#[async_trait]
pub trait RegistryStore: Send + Sync + std::fmt::Debug {
    /// Upsert; `Conflict` when a different active record holds the environment
    async fn put(&self, record: DeploymentRecord) -> Result<DeploymentRecord>;

    /// Install unconditionally; returns the displaced holder (archived as FAILED)
    async fn force_put(&self, record: DeploymentRecord) -> Result<Option<DeploymentRecord>>;

    /// Current non-terminal record for the environment
    async fn get_active(&self, environment: &str) -> Result<Option<DeploymentRecord>>;

    /// Look up any known record by correlation id
    async fn get(&self, correlation_id: &str) -> Result<Option<DeploymentRecord>>;

    /// Validated status transition of the slot holder
    async fn update_status(
        &self,
        correlation_id: &str,
        status: DeploymentStatus,
    ) -> Result<DeploymentRecord>;

    /// Release the slot held by `correlation_id`. Idempotent.
    async fn remove(&self, correlation_id: &str) -> Result<Option<DeploymentRecord>>;

    /// Recently archived records for the environment, newest last
    async fn recent(&self, environment: &str) -> Result<Vec<DeploymentRecord>>;

    /// Remove every record not updated within `max_age`, regardless of status
    async fn purge_stale(&self, max_age: Duration) -> Result<Vec<DeploymentRecord>>;

    /// End of lifecycle; later calls fail with `Unavailable`
    async fn close(&self) -> Result<()>;
}

pub(crate) fn cutoff_for(max_age: Duration) -> chrono::DateTime<chrono::Utc> {
    let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
    chrono::Utc::now()
        .checked_sub_signed(max_age)
        .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC)
}
