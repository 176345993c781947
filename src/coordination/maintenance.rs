//! # Registry Maintenance
//!
//! Periodic `purge_stale` pass. Callers that crash before `cleanup` leave their
//! record behind; this pass removes anything not updated within the retention
//! window, whatever its status.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::MaintenanceConfig;
use crate::error::Result;
use crate::metrics;
use crate::models::DeploymentRecord;
use crate::registry::RegistryStore;

#[derive(Debug, Clone)]
pub struct MaintenanceService {
    registry: Arc<dyn RegistryStore>,
    retention: Duration,
    config: MaintenanceConfig,
}

impl MaintenanceService {
    pub fn new(
        registry: Arc<dyn RegistryStore>,
        retention: Duration,
        config: MaintenanceConfig,
    ) -> Self {
        Self {
            registry,
            retention,
            config,
        }
    }

    /// One purge pass
    pub async fn run_once(&self) -> Result<Vec<DeploymentRecord>> {
        let purged = self.registry.purge_stale(self.retention).await?;
        if purged.is_empty() {
            debug!("No stale registry records");
            return Ok(purged);
        }

        metrics::purged_records_total().add(purged.len() as u64, &[]);
        for record in &purged {
            if record.is_active() {
                warn!(
                    correlation_id = %record.correlation_id,
                    environment = %record.environment,
                    status = %record.status,
                    updated_at = %record.updated_at,
                    "Purged abandoned active deployment"
                );
            }
        }
        info!(
            purged = purged.len(),
            retention_secs = self.retention.as_secs(),
            "Registry maintenance pass completed"
        );
        Ok(purged)
    }

    /// Run passes on the configured interval until stopped
    pub fn spawn(self) -> MaintenanceHandle {
        let shutdown = Arc::new(Notify::new());
        let task = tokio::spawn(self.run(Arc::clone(&shutdown)));
        MaintenanceHandle { shutdown, task }
    }

    async fn run(self, shutdown: Arc<Notify>) {
        let mut ticker = interval(self.config.purge_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_secs = self.config.purge_interval_seconds,
            retention_secs = self.retention.as_secs(),
            "Starting registry maintenance"
        );

        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    info!("Registry maintenance stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.run_once().await {
                error!(error = %e, "Registry maintenance pass failed");
            }
        }
    }
}

#[derive(Debug)]
pub struct MaintenanceHandle {
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    pub async fn stop(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.task.await {
            error!(error = %e, "Registry maintenance task ended abnormally");
        }
    }
}
