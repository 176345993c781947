//! # System Wiring
//!
//! Process-wide owner of the registry, historical store, notifier, coordinator
//! and monitor supervisor, with an explicit `open`/`close` lifecycle.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use shipyard_core::config::ConfigManager;
//! use shipyard_core::notification::LogTransport;
//! use shipyard_core::system::ShipyardSystem;
//! # use shipyard_core::monitoring::StatusFeed;
//!
//! # async fn run(feed: Arc<dyn StatusFeed>) -> anyhow::Result<()> {
//! let config = ConfigManager::load()?;
//! let system = ShipyardSystem::open(config, feed, Arc::new(LogTransport)).await?;
//! let decision = system.coordinator().can_deploy("staging", "api-stack").await?;
//! println!("allowed: {}", decision.allow);
//! system.close().await?;
//! # Ok(())
//! # }
//! ```

use anyhow::Context;
use std::sync::Arc;
use tracing::info;

use crate::config::ConfigManager;
use crate::constants::system;
use crate::coordination::{Coordinator, MaintenanceHandle, MaintenanceService};
use crate::estimation::{Estimator, HistoricalStore};
use crate::events::EventPublisher;
use crate::models::DeploymentRecord;
use crate::monitoring::{
    MonitorDependencies, MonitorHandle, MonitorSupervisor, StatusFeed, TerminalStatusSet,
};
use crate::notification::{NotificationTransport, Notifier, NotifierHandle};
use crate::registry::{FileRegistryStore, RegistryStore};

#[derive(Debug)]
pub struct ShipyardSystem {
    config: Arc<ConfigManager>,
    registry: Arc<dyn RegistryStore>,
    estimator: Estimator,
    notifier: NotifierHandle,
    publisher: EventPublisher,
    coordinator: Coordinator,
    supervisor: MonitorSupervisor,
    maintenance: Option<MaintenanceHandle>,
}

impl ShipyardSystem {
    /// Open the durable stores under `registry.state_dir` and start the background
    /// workers.
    pub async fn open(
        config: Arc<ConfigManager>,
        feed: Arc<dyn StatusFeed>,
        transport: Arc<dyn NotificationTransport>,
    ) -> anyhow::Result<Self> {
        let settings = config.config();
        let state_dir = settings.registry.state_dir.clone();

        let registry = FileRegistryStore::open(&state_dir, settings.registry.recent_history_limit)
            .with_context(|| format!("opening registry under {}", state_dir.display()))?;
        let history = HistoricalStore::open(
            state_dir.join(system::HISTORY_DIR),
            settings.estimator.sample_window,
        )
        .with_context(|| format!("opening historical store under {}", state_dir.display()))?;

        Self::from_parts(config, Arc::new(registry), Arc::new(history), feed, transport).await
    }

    /// Assemble a system around stores the caller already opened
    pub async fn from_parts(
        config: Arc<ConfigManager>,
        registry: Arc<dyn RegistryStore>,
        history: Arc<HistoricalStore>,
        feed: Arc<dyn StatusFeed>,
        transport: Arc<dyn NotificationTransport>,
    ) -> anyhow::Result<Self> {
        let settings = config.config().clone();

        let notifier = Notifier::start(settings.notifier.clone(), transport)
            .await
            .context("starting notifier")?;
        let publisher = EventPublisher::default().with_notifier(notifier.clone());
        let estimator = Estimator::new(history, settings.estimator.clone());
        let terminal_statuses = TerminalStatusSet::from_config(&settings.feed);

        let coordinator = Coordinator::new(
            Arc::clone(&registry),
            Arc::clone(&feed),
            terminal_statuses.clone(),
            estimator.clone(),
            publisher.clone(),
            settings.coordinator.clone(),
        );
        let supervisor = MonitorSupervisor::new(MonitorDependencies {
            registry: Arc::clone(&registry),
            feed,
            terminal_statuses,
            estimator: estimator.clone(),
            publisher: publisher.clone(),
            config: settings.monitor.clone(),
        });

        let maintenance = settings.maintenance.enabled.then(|| {
            MaintenanceService::new(
                Arc::clone(&registry),
                settings.registry.retention(),
                settings.maintenance.clone(),
            )
            .spawn()
        });

        info!(
            environment = %config.environment(),
            maintenance = maintenance.is_some(),
            "Shipyard system opened"
        );

        Ok(Self {
            config,
            registry,
            estimator,
            notifier,
            publisher,
            coordinator,
            supervisor,
            maintenance,
        })
    }

    pub fn config(&self) -> &ConfigManager {
        &self.config
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn registry(&self) -> &Arc<dyn RegistryStore> {
        &self.registry
    }

    pub fn estimator(&self) -> &Estimator {
        &self.estimator
    }

    pub fn notifier(&self) -> &NotifierHandle {
        &self.notifier
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    /// Start a supervised monitor for an admitted deployment
    pub fn monitor(&self, record: DeploymentRecord) -> MonitorHandle {
        self.supervisor.spawn(record)
    }

    /// Stop maintenance, drain the notifier to its spool, and close the registry
    pub async fn close(self) -> anyhow::Result<()> {
        if let Some(maintenance) = self.maintenance {
            maintenance.stop().await;
        }
        self.notifier
            .shutdown()
            .await
            .context("shutting down notifier")?;
        self.registry.close().await.context("closing registry")?;
        info!("Shipyard system closed");
        Ok(())
    }
}
