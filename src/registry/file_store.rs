//! # File Registry Store
//!
//! Durable [`RegistryStore`] keeping one JSON document per environment under
//! `<state_dir>/registry/<environment>.json`.
//!
//! Each mutation takes the environment's async lock, reads the document from
//! disk, applies the [`EnvironmentDocument`] rule and writes the result back via
//! temp-file-and-rename. A crash at any point leaves either the old or the new
//! document on disk, never a torn one.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::try_join_all;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::document::{EnvironmentDocument, Evicted};
use super::{cutoff_for, RegistryStore};
use crate::constants::{system, DeploymentStatus};
use crate::error::{Result, ShipyardError};
use crate::models::DeploymentRecord;
use crate::utils::fs::{read_json, read_json_sync, sanitize_file_stem, write_json_atomic};

#[derive(Debug)]
pub struct FileRegistryStore {
    directory: PathBuf,
    recent_limit: usize,
    locks: DashMap<String, Arc<Mutex<()>>>,
    /// correlation id -> environment
    index: DashMap<String, String>,
    closed: AtomicBool,
}

impl FileRegistryStore {
    /// Open the store rooted at `state_dir`, creating the directory if needed and
    /// rebuilding the correlation index from the documents already on disk.
    pub fn open(state_dir: impl AsRef<Path>, recent_limit: usize) -> Result<Self> {
        let directory = state_dir.as_ref().join(system::REGISTRY_DIR);
        std::fs::create_dir_all(&directory).map_err(|e| {
            ShipyardError::Unavailable(format!(
                "registry directory {} is not usable: {e}",
                directory.display()
            ))
        })?;

        let index = DashMap::new();
        let entries = std::fs::read_dir(&directory)
            .map_err(|e| ShipyardError::Unavailable(format!("reading registry directory: {e}")))?;
        let mut documents = 0usize;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match read_json_sync::<EnvironmentDocument>(&path) {
                Ok(Some(doc)) => {
                    for record in doc.active.iter().chain(doc.recent.iter()) {
                        index.insert(record.correlation_id.clone(), doc.environment.clone());
                    }
                    documents += 1;
                }
                Ok(None) => {}
                Err(e) => warn!(
                    path = %path.display(),
                    error = %e,
                    "Skipping unreadable registry document"
                ),
            }
        }

        info!(
            directory = %directory.display(),
            documents = documents,
            indexed_records = index.len(),
            "Opened file registry store"
        );

        Ok(Self {
            directory,
            recent_limit,
            locks: DashMap::new(),
            index,
            closed: AtomicBool::new(false),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn document_path(&self, environment: &str) -> PathBuf {
        self.directory
            .join(format!("{}.json", sanitize_file_stem(environment)))
    }

    fn lock_for(&self, environment: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(environment.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ShipyardError::Unavailable("registry is closed".to_string()));
        }
        Ok(())
    }

    async fn load(&self, environment: &str) -> Result<EnvironmentDocument> {
        let path = self.document_path(environment);
        match read_json::<EnvironmentDocument>(&path).await {
            Ok(Some(doc)) => Ok(doc),
            Ok(None) => Ok(EnvironmentDocument::new(environment)),
            Err(e) => Err(ShipyardError::Unavailable(format!(
                "reading {}: {e}",
                path.display()
            ))),
        }
    }

    async fn save(&self, doc: &EnvironmentDocument) -> Result<()> {
        let path = self.document_path(&doc.environment);
        write_json_atomic(&path, doc).await.map_err(|e| {
            ShipyardError::Unavailable(format!("writing {}: {e}", path.display()))
        })
    }

    /// Read-modify-write of one environment document under its lock. The document
    /// is only written back when `mutate` succeeds.
    async fn with_document<T, F>(&self, environment: &str, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut EnvironmentDocument) -> Result<T> + Send,
        T: Send,
    {
        self.ensure_open()?;
        let lock = self.lock_for(environment);
        let _guard = lock.lock().await;
        let mut doc = self.load(environment).await?;
        let value = mutate(&mut doc)?;
        self.save(&doc).await?;
        Ok(value)
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

    async fn known_environments(&self) -> Result<Vec<String>> {
        let mut environments = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.directory)
            .await
            .map_err(|e| ShipyardError::Unavailable(format!("reading registry directory: {e}")))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ShipyardError::Unavailable(format!("reading registry directory: {e}")))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Ok(Some(doc)) = read_json::<EnvironmentDocument>(&path).await {
                environments.push(doc.environment);
            }
        }
        Ok(environments)
    }
}

#[async_trait]
impl RegistryStore for FileRegistryStore {
    async fn put(&self, record: DeploymentRecord) -> Result<DeploymentRecord> {
        let limit = self.recent_limit;
        let stored = record.clone();
        let evicted = self
            .with_document(&record.environment, move |doc| doc.put(stored, limit))
            .await?;
        self.forget(evicted);
        self.index
            .insert(record.correlation_id.clone(), record.environment.clone());
        debug!(
            correlation_id = %record.correlation_id,
            environment = %record.environment,
            status = %record.status,
            "Registry record stored"
        );
        Ok(record)
    }

    async fn force_put(&self, record: DeploymentRecord) -> Result<Option<DeploymentRecord>> {
        let limit = self.recent_limit;
        let stored = record.clone();
        let (displaced, evicted) = self
            .with_document(&record.environment, move |doc| doc.force_put(stored, limit))
            .await?;
        self.forget(evicted);
        self.index
            .insert(record.correlation_id.clone(), record.environment.clone());
        Ok(displaced)
    }

    async fn get_active(&self, environment: &str) -> Result<Option<DeploymentRecord>> {
        self.ensure_open()?;
        let lock = self.lock_for(environment);
        let _guard = lock.lock().await;
        let doc = self.load(environment).await?;
        Ok(doc.active_record().cloned())
    }

    async fn get(&self, correlation_id: &str) -> Result<Option<DeploymentRecord>> {
        self.ensure_open()?;
        let Some(environment) = self.environment_of(correlation_id) else {
            return Ok(None);
        };
        let doc = self.load(&environment).await?;
        Ok(doc.find(correlation_id).cloned())
    }

    async fn update_status(
        &self,
        correlation_id: &str,
        status: DeploymentStatus,
    ) -> Result<DeploymentRecord> {
        self.ensure_open()?;
        let environment = self
            .environment_of(correlation_id)
            .ok_or_else(|| ShipyardError::NotFound(format!("deployment {correlation_id}")))?;
        self.with_document(&environment, |doc| doc.update_status(correlation_id, status))
            .await
    }

    async fn remove(&self, correlation_id: &str) -> Result<Option<DeploymentRecord>> {
        self.ensure_open()?;
        let Some(environment) = self.environment_of(correlation_id) else {
            return Ok(None);
        };
        let limit = self.recent_limit;
        let (released, evicted) = self
            .with_document(&environment, |doc| doc.remove(correlation_id, limit))
            .await?;
        self.forget(evicted);
        Ok(released)
    }

    async fn recent(&self, environment: &str) -> Result<Vec<DeploymentRecord>> {
        self.ensure_open()?;
        Ok(self.load(environment).await?.recent)
    }

    async fn purge_stale(&self, max_age: Duration) -> Result<Vec<DeploymentRecord>> {
        self.ensure_open()?;
        let cutoff = cutoff_for(max_age);
        let environments = self.known_environments().await?;
        let purged: Vec<DeploymentRecord> = try_join_all(environments.iter().map(|environment| {
            self.with_document(environment, |doc| Ok(doc.purge_stale(cutoff)))
        }))
        .await?
        .into_iter()
        .flatten()
        .collect();
        for record in &purged {
            self.index.remove(&record.correlation_id);
        }
        Ok(purged)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        info!(directory = %self.directory.display(), "Closed file registry store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeploymentRequest;

    fn record(env: &str) -> DeploymentRecord {
        DeploymentRecord::new(&DeploymentRequest::new(env, "api-stack", "run-1"))
    }

    #[tokio::test]
    async fn test_second_active_record_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRegistryStore::open(dir.path(), 10).unwrap();

        let first = store.put(record("production")).await.unwrap();
        let err = store.put(record("production")).await.unwrap_err();
        assert_eq!(
            err,
            ShipyardError::Conflict {
                environment: "production".to_string(),
                blocking_correlation_id: first.correlation_id,
            }
        );
    }

    #[tokio::test]
    async fn test_concurrent_puts_admit_exactly_one() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileRegistryStore::open(dir.path(), 10).unwrap());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.put(record("production")).await
            }));
        }
        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRegistryStore::open(dir.path(), 10).unwrap();

        let r = store.put(record("staging")).await.unwrap();
        assert!(store.remove(&r.correlation_id).await.unwrap().is_some());
        assert!(store.remove(&r.correlation_id).await.unwrap().is_none());
        assert!(store.remove("unknown-id").await.unwrap().is_none());
        assert!(store.get_active("staging").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purge_removes_old_records_regardless_of_status() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRegistryStore::open(dir.path(), 10).unwrap();

        let mut stuck = record("staging");
        stuck.status = DeploymentStatus::InProgress;
        stuck.updated_at = chrono::Utc::now() - chrono::Duration::days(8);
        store.put(stuck.clone()).await.unwrap();

        let purged = store
            .purge_stale(Duration::from_secs(7 * 24 * 3600))
            .await
            .unwrap();
        assert_eq!(purged.len(), 1);
        assert_eq!(purged[0].correlation_id, stuck.correlation_id);
        assert!(store.get_active("staging").await.unwrap().is_none());
        assert!(store.get(&stuck.correlation_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let r = {
            let store = FileRegistryStore::open(dir.path(), 10).unwrap();
            let r = store.put(record("production")).await.unwrap();
            store.close().await.unwrap();
            r
        };

        let reopened = FileRegistryStore::open(dir.path(), 10).unwrap();
        let active = reopened.get_active("production").await.unwrap().unwrap();
        assert_eq!(active.correlation_id, r.correlation_id);
        let updated = reopened
            .update_status(&r.correlation_id, DeploymentStatus::InProgress)
            .await
            .unwrap();
        assert_eq!(updated.status, DeploymentStatus::InProgress);
    }

    #[tokio::test]
    async fn test_index_drops_records_evicted_from_recent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRegistryStore::open(dir.path(), 2).unwrap();

        let mut ids = Vec::new();
        for _ in 0..10 {
            let r = store.put(record("staging")).await.unwrap();
            store.remove(&r.correlation_id).await.unwrap();
            ids.push(r.correlation_id);
            assert!(store.indexed_records() <= 2 + 1);
        }
        assert_eq!(store.indexed_records(), 2);
        assert!(store.get(&ids[0]).await.unwrap().is_none());
        assert!(store.get(&ids[9]).await.unwrap().is_some());

        store.close().await.unwrap();
        let reopened = FileRegistryStore::open(dir.path(), 2).unwrap();
        assert_eq!(reopened.indexed_records(), 2);
    }

    #[tokio::test]
    async fn test_closed_store_rejects_calls() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRegistryStore::open(dir.path(), 10).unwrap();
        store.close().await.unwrap();
        assert!(store
            .get_active("staging")
            .await
            .unwrap_err()
            .is_unavailable());
    }
}
