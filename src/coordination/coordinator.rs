//! # Deployment Coordinator
//!
//! Admission control for deployments: at most one active deployment per
//! environment, enforced through the registry.
//!
//! Registry errors are returned to the caller. The one exception is
//! `Unavailable`, where the coordinator falls back to asking the orchestrator
//! whether the target is busy. That fallback may refuse more than necessary, but
//! it never admits a deployment while the target is running.

use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use super::decision::{Admission, BlockingDeployment, Decision};
use super::guard::CleanupGuard;
use crate::config::CoordinatorConfig;
use crate::constants::{system, CoordinatorPhase, DeploymentStatus};
use crate::error::{Result, ShipyardError};
use crate::estimation::{Estimate, Estimator};
use crate::events::{DeploymentEvent, EventPublisher};
use crate::logging::log_coordination_operation;
use crate::metrics;
use crate::models::deployment_record::validate_name;
use crate::models::{DeploymentRecord, DeploymentRequest};
use crate::monitoring::{ExternalOutcome, FeedError, FeedQuery, StatusFeed, TerminalStatusSet};
use crate::registry::RegistryStore;

#[derive(Debug, Clone)]
pub struct Coordinator {
    registry: Arc<dyn RegistryStore>,
    feed: Arc<dyn StatusFeed>,
    terminal_statuses: TerminalStatusSet,
    estimator: Estimator,
    publisher: EventPublisher,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(
        registry: Arc<dyn RegistryStore>,
        feed: Arc<dyn StatusFeed>,
        terminal_statuses: TerminalStatusSet,
        estimator: Estimator,
        publisher: EventPublisher,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            registry,
            feed,
            terminal_statuses,
            estimator,
            publisher,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<dyn RegistryStore> {
        &self.registry
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    /// Whether a deployment of `target_name` may start in `environment` right now
    pub async fn can_deploy(&self, environment: &str, target_name: &str) -> Result<Decision> {
        validate_name("environment", environment)?;
        match self.registry.get_active(environment).await {
            Ok(None) => Ok(Decision::free(false)),
            Ok(Some(active)) => Ok(Decision::busy(
                BlockingDeployment::from_record(&active),
                false,
            )),
            Err(e) if e.is_unavailable() => {
                self.degraded_decision(environment, target_name, &e).await
            }
            Err(e) => Err(e),
        }
    }

    /// Ask the orchestrator directly. Any non-terminal external state counts as busy;
    /// if the orchestrator cannot answer either, no admission is possible.
    async fn degraded_decision(
        &self,
        environment: &str,
        target_name: &str,
        registry_error: &ShipyardError,
    ) -> Result<Decision> {
        metrics::degraded_decisions_total().add(
            1,
            &[KeyValue::new("environment", environment.to_string())],
        );
        warn!(
            environment = %environment,
            target_name = %target_name,
            error = %registry_error,
            "Registry unavailable, deciding from orchestrator status"
        );

        match self
            .feed
            .fetch_status(&FeedQuery::for_target(target_name))
            .await
        {
            Ok(status) => match self.terminal_statuses.classify(&status.status) {
                ExternalOutcome::InProgress => Ok(Decision::busy(
                    BlockingDeployment::from_external(target_name, &status.status),
                    true,
                )),
                ExternalOutcome::Succeeded | ExternalOutcome::Failed => Ok(Decision::free(true)),
            },
            Err(FeedError::NotFound(_)) => Ok(Decision::free(true)),
            Err(feed_error) => Err(ShipyardError::Unavailable(format!(
                "registry unavailable ({registry_error}) and orchestrator status unknown ({feed_error})"
            ))),
        }
    }

    /// Admit a deployment. A busy environment yields `Conflict` naming the holder.
    pub async fn register(&self, request: DeploymentRequest) -> Result<Admission> {
        request.validate()?;
        let record = DeploymentRecord::new(&request);

        match self.registry.put(record.clone()).await {
            Ok(stored) => Ok(self.admitted(stored, true)),
            Err(ShipyardError::Conflict {
                environment,
                blocking_correlation_id,
            }) => Err(self.rejected(environment, blocking_correlation_id)),
            Err(e) if e.is_unavailable() => {
                let decision = self
                    .degraded_decision(&request.environment, &request.target_name, &e)
                    .await?;
                if decision.allow {
                    Ok(self.admitted(record, false))
                } else {
                    let blocking = decision
                        .blocking_correlation_id()
                        .unwrap_or(system::UNKNOWN)
                        .to_string();
                    Err(self.rejected(request.environment, blocking))
                }
            }
            Err(e) => Err(e),
        }
    }

    /// [`Coordinator::register`] wrapped in a guard that releases the slot on every exit path
    pub async fn register_guarded(&self, request: DeploymentRequest) -> Result<CleanupGuard> {
        let admission = self.register(request).await?;
        Ok(CleanupGuard::new(self.clone(), admission))
    }

    /// Take the environment regardless of its holder. The displaced deployment is
    /// archived as FAILED. Never used implicitly.
    pub async fn force_register(&self, request: DeploymentRequest) -> Result<Admission> {
        request.validate()?;
        let record = DeploymentRecord::new(&request);
        let displaced = self.registry.force_put(record.clone()).await?;
        if let Some(displaced) = displaced {
            warn!(
                correlation_id = %record.correlation_id,
                environment = %record.environment,
                displaced_correlation_id = %displaced.correlation_id,
                "Forced registration displaced active deployment"
            );
        }
        Ok(self.admitted(record, true))
    }

    fn admitted(&self, record: DeploymentRecord, durable: bool) -> Admission {
        metrics::registrations_total().add(1, &[KeyValue::new("durable", durable)]);
        log_coordination_operation(
            "register",
            Some(&record.correlation_id),
            &record.environment,
            if durable { "admitted" } else { "admitted_untracked" },
            Some(&format!(
                "phase {:?} -> {:?}",
                CoordinatorPhase::Requested,
                CoordinatorPhase::Admitted
            )),
        );
        self.publisher.publish_or_log(DeploymentEvent::Start {
            correlation_id: record.correlation_id.clone(),
            environment: record.environment.clone(),
            target_name: record.target_name.clone(),
            started_at: record.started_at,
        });
        Admission { record, durable }
    }

    fn rejected(&self, environment: String, blocking_correlation_id: String) -> ShipyardError {
        metrics::conflicts_total().add(1, &[KeyValue::new("environment", environment.clone())]);
        log_coordination_operation(
            "register",
            None,
            &environment,
            "busy",
            Some(&format!("blocked by {blocking_correlation_id}")),
        );
        ShipyardError::Conflict {
            environment,
            blocking_correlation_id,
        }
    }

    /// Mark an admitted deployment as running (PENDING -> IN_PROGRESS)
    pub async fn start(&self, correlation_id: &str) -> Result<DeploymentRecord> {
        let record = self
            .registry
            .update_status(correlation_id, DeploymentStatus::InProgress)
            .await?;
        log_coordination_operation(
            "start",
            Some(correlation_id),
            &record.environment,
            record.status.as_str(),
            None,
        );
        Ok(record)
    }

    /// Poll until the environment is free or `timeout` elapses.
    ///
    /// One CONCURRENT_WAIT notification is raised the first time the environment
    /// is seen busy. A slot freed after the timeout is not pushed to the caller;
    /// it is seen on the caller's next call.
    pub async fn wait(
        &self,
        environment: &str,
        target_name: &str,
        timeout: Duration,
    ) -> Result<Decision> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut announced = false;

        loop {
            let decision = self.can_deploy(environment, target_name).await?;
            if decision.allow {
                log_coordination_operation(
                    "wait",
                    None,
                    environment,
                    "free",
                    Some(&format!("waited {}s", started.elapsed().as_secs())),
                );
                return Ok(decision);
            }

            if !announced {
                announced = true;
                if let Some(blocking) = &decision.blocking {
                    self.announce_wait(environment, blocking);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                log_coordination_operation(
                    "wait",
                    None,
                    environment,
                    "timed_out",
                    decision.blocking_correlation_id(),
                );
                return Err(ShipyardError::TimedOut {
                    environment: environment.to_string(),
                    waited: timeout,
                });
            }

            let pause = self.config.wait_poll_interval().min(deadline - now);
            debug!(
                environment = %environment,
                blocking_correlation_id = decision.blocking_correlation_id(),
                next_check_secs = pause.as_secs(),
                "Environment busy, waiting"
            );
            sleep(pause).await;
        }
    }

    fn announce_wait(&self, environment: &str, blocking: &BlockingDeployment) {
        let estimated_wait = self.estimator.estimate(
            &blocking.target_name,
            blocking.elapsed().unwrap_or_default(),
        );
        log_coordination_operation(
            "wait",
            None,
            environment,
            "busy",
            Some(&format!(
                "blocked by {}, estimated wait {}",
                blocking.correlation_id,
                estimated_wait.render()
            )),
        );
        self.publisher
            .publish_or_log(DeploymentEvent::ConcurrentWait {
                environment: environment.to_string(),
                blocking_correlation_id: blocking.correlation_id.clone(),
                estimated_wait,
            });
    }

    /// Release the slot held by `correlation_id`. Safe to call any number of times.
    pub async fn cleanup(&self, correlation_id: &str) -> Result<Option<DeploymentRecord>> {
        let released = self.registry.remove(correlation_id).await?;
        match &released {
            Some(record) => log_coordination_operation(
                "cleanup",
                Some(correlation_id),
                &record.environment,
                record.status.as_str(),
                Some("slot released"),
            ),
            None => debug!(correlation_id = %correlation_id, "Cleanup found nothing to release"),
        }
        Ok(released)
    }

    pub async fn get_active(&self, environment: &str) -> Result<Option<DeploymentRecord>> {
        self.registry.get_active(environment).await
    }

    pub fn estimate(&self, target_name: &str, elapsed: Duration) -> Estimate {
        self.estimator.estimate(target_name, elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EstimatorConfig;
    use crate::estimation::HistoricalStore;
    use crate::registry::InMemoryRegistryStore;
    use crate::test_helpers::ScriptedStatusFeed;

    fn coordinator(
        registry: Arc<InMemoryRegistryStore>,
        feed: Arc<ScriptedStatusFeed>,
    ) -> Coordinator {
        Coordinator::new(
            registry,
            feed,
            TerminalStatusSet::default(),
            Estimator::new(
                Arc::new(HistoricalStore::in_memory(20)),
                EstimatorConfig::default(),
            ),
            EventPublisher::new(64),
            CoordinatorConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_register_then_busy_then_free_after_cleanup() {
        let registry = Arc::new(InMemoryRegistryStore::default());
        let coordinator = coordinator(registry, Arc::new(ScriptedStatusFeed::new()));

        let a = coordinator
            .register(DeploymentRequest::new("production", "api", "run-a"))
            .await
            .unwrap();
        assert!(a.durable);

        let decision = coordinator.can_deploy("production", "api").await.unwrap();
        assert!(!decision.allow);
        assert_eq!(decision.blocking_correlation_id(), Some(a.correlation_id()));

        coordinator.cleanup(a.correlation_id()).await.unwrap();
        assert!(coordinator.can_deploy("production", "api").await.unwrap().allow);
    }

    #[tokio::test]
    async fn test_invalid_environment_is_rejected() {
        let registry = Arc::new(InMemoryRegistryStore::default());
        let coordinator = coordinator(registry, Arc::new(ScriptedStatusFeed::new()));
        let err = coordinator.can_deploy("prod/eu", "api").await.unwrap_err();
        assert!(matches!(err, ShipyardError::Validation(_)));
    }

    #[tokio::test]
    async fn test_degraded_register_refuses_busy_target() {
        let registry = Arc::new(InMemoryRegistryStore::default());
        registry.set_available(false);
        let feed = Arc::new(ScriptedStatusFeed::new());
        feed.set_default_status("UPDATE_IN_PROGRESS");
        let coordinator = coordinator(registry, feed);

        let err = coordinator
            .register(DeploymentRequest::new("production", "api", "run-b"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ShipyardError::Conflict {
                environment: "production".to_string(),
                blocking_correlation_id: system::UNKNOWN.to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_degraded_register_admits_idle_target_untracked() {
        let registry = Arc::new(InMemoryRegistryStore::default());
        registry.set_available(false);
        let feed = Arc::new(ScriptedStatusFeed::new());
        feed.set_default_status("UPDATE_COMPLETE");
        let coordinator = coordinator(registry, feed);

        let admission = coordinator
            .register(DeploymentRequest::new("production", "api", "run-c"))
            .await
            .unwrap();
        assert!(!admission.durable);
    }

    #[tokio::test]
    async fn test_degraded_without_feed_is_unavailable() {
        let registry = Arc::new(InMemoryRegistryStore::default());
        registry.set_available(false);
        let feed = Arc::new(ScriptedStatusFeed::new());
        feed.set_unavailable(true);
        let coordinator = coordinator(registry, feed);

        let err = coordinator.can_deploy("staging", "api").await.unwrap_err();
        assert!(err.is_unavailable());
    }
}
