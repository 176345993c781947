//! # In-Memory Registry Store
//!
//! Process-local [`RegistryStore`]. Shares the document rules with the durable
//! store and adds an availability switch so degraded-mode paths can be exercised.
//!
//! ```rust
//! use shipyard_core::models::{DeploymentRecord, DeploymentRequest};
//! use shipyard_core::registry::{InMemoryRegistryStore, RegistryStore};
//!
//! # tokio_test::block_on(async {
//! let store = InMemoryRegistryStore::default();
//! let request = DeploymentRequest::new("production", "api-stack", "run-8841");
//! let first = store.put(DeploymentRecord::new(&request)).await.unwrap();
//!
//! // a second deployment to the same environment is refused
//! let err = store.put(DeploymentRecord::new(&request)).await.unwrap_err();
//! assert!(err.is_conflict());
//!
//! store.remove(&first.correlation_id).await.unwrap();
//! assert!(store.get_active("production").await.unwrap().is_none());
//! # });
//! ```

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::document::{EnvironmentDocument, Evicted};
use super::{cutoff_for, RegistryStore};
use crate::constants::DeploymentStatus;
use crate::error::{Result, ShipyardError};
use crate::models::DeploymentRecord;

#[derive(Debug)]
pub struct InMemoryRegistryStore {
    documents: DashMap<String, EnvironmentDocument>,
    /// correlation id -> environment
    index: DashMap<String, String>,
    recent_limit: usize,
    available: AtomicBool,
    closed: AtomicBool,
}

impl Default for InMemoryRegistryStore {
    fn default() -> Self {
        Self::new(10)
    }
}

impl InMemoryRegistryStore {
    pub fn new(recent_limit: usize) -> Self {
        Self {
            documents: DashMap::new(),
            index: DashMap::new(),
            recent_limit,
            available: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        }
    }

    /// Simulate an outage of the backing store (for testing)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Overwrite a record verbatim, bypassing conflict rules (for testing)
    pub fn insert_raw(&self, record: DeploymentRecord) {
        self.index
            .insert(record.correlation_id.clone(), record.environment.clone());
        let mut doc = self
            .documents
            .entry(record.environment.clone())
            .or_insert_with(|| EnvironmentDocument::new(record.environment.clone()));
        doc.active = Some(record);
    }

    fn ensure_available(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ShipyardError::Unavailable("registry is closed".to_string()));
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(ShipyardError::Unavailable(
                "registry backend unreachable".to_string(),
            ));
        }
        Ok(())
    }

    fn environment_of(&self, correlation_id: &str) -> Option<String> {
        self.index.get(correlation_id).map(|env| env.value().clone())
    }

    fn forget(&self, evicted: Evicted) {
        for correlation_id in evicted {
            self.index.remove(&correlation_id);
        }
    }

    /// Number of correlation ids the lookup index currently holds
    pub fn indexed_records(&self) -> usize {
        self.index.len()
    }
}

#[async_trait]
impl RegistryStore for InMemoryRegistryStore {
    async fn put(&self, record: DeploymentRecord) -> Result<DeploymentRecord> {
        self.ensure_available()?;
        let mut doc = self
            .documents
            .entry(record.environment.clone())
            .or_insert_with(|| EnvironmentDocument::new(record.environment.clone()));
        let evicted = doc.put(record.clone(), self.recent_limit)?;
        drop(doc);
        self.forget(evicted);
        self.index
            .insert(record.correlation_id.clone(), record.environment.clone());
        Ok(record)
    }

    async fn force_put(&self, record: DeploymentRecord) -> Result<Option<DeploymentRecord>> {
        self.ensure_available()?;
        let mut doc = self
            .documents
            .entry(record.environment.clone())
            .or_insert_with(|| EnvironmentDocument::new(record.environment.clone()));
        let (displaced, evicted) = doc.force_put(record.clone(), self.recent_limit)?;
        drop(doc);
        self.forget(evicted);
        self.index
            .insert(record.correlation_id.clone(), record.environment.clone());
        Ok(displaced)
    }

    async fn get_active(&self, environment: &str) -> Result<Option<DeploymentRecord>> {
        self.ensure_available()?;
        Ok(self
            .documents
            .get(environment)
            .and_then(|doc| doc.active_record().cloned()))
    }

    async fn get(&self, correlation_id: &str) -> Result<Option<DeploymentRecord>> {
        self.ensure_available()?;
        let Some(environment) = self.environment_of(correlation_id) else {
            return Ok(None);
        };
        Ok(self
            .documents
            .get(&environment)
            .and_then(|doc| doc.find(correlation_id).cloned()))
    }

    async fn update_status(
        &self,
        correlation_id: &str,
        status: DeploymentStatus,
    ) -> Result<DeploymentRecord> {
        self.ensure_available()?;
        let environment = self
            .environment_of(correlation_id)
            .ok_or_else(|| ShipyardError::NotFound(format!("deployment {correlation_id}")))?;
        let mut doc = self
            .documents
            .get_mut(&environment)
            .ok_or_else(|| ShipyardError::NotFound(format!("environment {environment}")))?;
        doc.update_status(correlation_id, status)
    }

    async fn remove(&self, correlation_id: &str) -> Result<Option<DeploymentRecord>> {
        self.ensure_available()?;
        let Some(environment) = self.environment_of(correlation_id) else {
            return Ok(None);
        };
        let (released, evicted) = match self.documents.get_mut(&environment) {
            Some(mut doc) => doc.remove(correlation_id, self.recent_limit)?,
            None => return Ok(None),
        };
        self.forget(evicted);
        Ok(released)
    }

    async fn recent(&self, environment: &str) -> Result<Vec<DeploymentRecord>> {
        self.ensure_available()?;
        Ok(self
            .documents
            .get(environment)
            .map(|doc| doc.recent.clone())
            .unwrap_or_default())
    }

    async fn purge_stale(&self, max_age: Duration) -> Result<Vec<DeploymentRecord>> {
        self.ensure_available()?;
        let cutoff = cutoff_for(max_age);
        let mut purged = Vec::new();
        for mut doc in self.documents.iter_mut() {
            purged.extend(doc.purge_stale(cutoff));
        }
        for record in &purged {
            self.index.remove(&record.correlation_id);
        }
        Ok(purged)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
