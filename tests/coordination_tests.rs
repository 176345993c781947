//! Admission, waiting and slot release through the coordinator.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tempfile::TempDir;

use shipyard_core::config::{CoordinatorConfig, EstimatorConfig};
use shipyard_core::constants::{CoordinatorPhase, DeploymentStatus, NotificationKind};
use shipyard_core::coordination::{Coordinator, DecisionReason};
use shipyard_core::estimation::{Estimator, HistoricalStore};
use shipyard_core::events::{DeploymentEvent, EventPublisher};
use shipyard_core::models::DeploymentRequest;
use shipyard_core::monitoring::TerminalStatusSet;
use shipyard_core::registry::{FileRegistryStore, InMemoryRegistryStore, RegistryStore};
use shipyard_core::test_helpers::{drain_events, ScriptedStatusFeed};
use shipyard_core::ShipyardError;

fn coordinator_over(
    registry: Arc<dyn RegistryStore>,
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
        EventPublisher::new(256),
        CoordinatorConfig::default(),
    )
}

fn in_memory() -> (Coordinator, Arc<InMemoryRegistryStore>) {
    let registry = Arc::new(InMemoryRegistryStore::default());
    let coordinator = coordinator_over(registry.clone(), Arc::new(ScriptedStatusFeed::new()));
    (coordinator, registry)
}

fn request(run: &str) -> DeploymentRequest {
    DeploymentRequest::new("production", "api-stack", run)
}

#[tokio::test]
async fn test_second_caller_is_blocked_until_cleanup() {
    let (coordinator, _registry) = in_memory();

    let first = coordinator.register(request("run-a")).await.unwrap();
    assert!(first.durable);
    assert_eq!(first.record.status, DeploymentStatus::Pending);

    let err = coordinator.register(request("run-b")).await.unwrap_err();
    assert_eq!(
        err,
        ShipyardError::Conflict {
            environment: "production".to_string(),
            blocking_correlation_id: first.correlation_id().to_string(),
        }
    );

    let decision = coordinator
        .can_deploy("production", "api-stack")
        .await
        .unwrap();
    assert!(!decision.allow);
    assert_eq!(decision.reason, DecisionReason::Busy);
    assert!(!decision.degraded);
    assert_eq!(decision.blocking_correlation_id(), Some(first.correlation_id()));

    coordinator.cleanup(first.correlation_id()).await.unwrap();

    let decision = coordinator
        .can_deploy("production", "api-stack")
        .await
        .unwrap();
    assert!(decision.allow);
    let second = coordinator.register(request("run-b")).await.unwrap();
    assert_ne!(second.correlation_id(), first.correlation_id());
}

#[tokio::test]
async fn test_other_environments_are_independent() {
    let (coordinator, _registry) = in_memory();
    coordinator.register(request("run-a")).await.unwrap();

    let staging = coordinator
        .register(DeploymentRequest::new("staging", "api-stack", "run-s"))
        .await
        .unwrap();
    assert_eq!(staging.record.environment, "staging");
}

#[tokio::test]
async fn test_concurrent_registrations_admit_exactly_one() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(FileRegistryStore::open(dir.path(), 10).unwrap());
    let coordinator = coordinator_over(registry, Arc::new(ScriptedStatusFeed::new()));

    let attempts = (0..8).map(|i| {
        let coordinator = coordinator.clone();
        async move { coordinator.register(request(&format!("run-{i}"))).await }
    });
    let results = join_all(attempts).await;

    let admitted: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(admitted.len(), 1);
    let winner = admitted[0].correlation_id().to_string();
    for result in &results {
        if let Err(err) = result {
            assert!(err.is_conflict());
            assert_eq!(
                err,
                &ShipyardError::Conflict {
                    environment: "production".to_string(),
                    blocking_correlation_id: winner.clone(),
                }
            );
        }
    }
}

#[tokio::test]
async fn test_cleanup_is_idempotent() {
    let (coordinator, registry) = in_memory();
    let admission = coordinator.register(request("run-a")).await.unwrap();

    let released = coordinator.cleanup(admission.correlation_id()).await.unwrap();
    assert_eq!(released.unwrap().status, DeploymentStatus::Failed);
    assert!(coordinator
        .cleanup(admission.correlation_id())
        .await
        .unwrap()
        .is_none());
    assert!(coordinator.cleanup("never-registered").await.unwrap().is_none());

    let recent = registry.recent("production").await.unwrap();
    assert_eq!(recent.len(), 1);
}

#[tokio::test]
async fn test_cleanup_after_completion_keeps_outcome() {
    let (coordinator, registry) = in_memory();
    let admission = coordinator.register(request("run-a")).await.unwrap();
    coordinator.start(admission.correlation_id()).await.unwrap();
    registry
        .update_status(admission.correlation_id(), DeploymentStatus::Completed)
        .await
        .unwrap();

    let released = coordinator
        .cleanup(admission.correlation_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(released.status, DeploymentStatus::Completed);
}

#[tokio::test]
async fn test_force_register_displaces_holder() {
    let (coordinator, registry) = in_memory();
    let first = coordinator.register(request("run-a")).await.unwrap();

    let forced = coordinator.force_register(request("run-b")).await.unwrap();

    let active = coordinator.get_active("production").await.unwrap().unwrap();
    assert_eq!(active.correlation_id, forced.correlation_id());
    let displaced = registry.get(first.correlation_id()).await.unwrap().unwrap();
    assert_eq!(displaced.status, DeploymentStatus::Failed);
}

#[tokio::test]
async fn test_registration_publishes_start() {
    let (coordinator, _registry) = in_memory();
    let mut events = coordinator.publisher().subscribe();

    let admission = coordinator.register(request("run-a")).await.unwrap();

    let events = drain_events(&mut events);
    assert_eq!(events.len(), 1);
    match &events[0] {
        DeploymentEvent::Start {
            correlation_id,
            environment,
            target_name,
            ..
        } => {
            assert_eq!(correlation_id, admission.correlation_id());
            assert_eq!(environment, "production");
            assert_eq!(target_name, "api-stack");
        }
        other => panic!("expected START, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_wait_times_out_with_one_concurrent_wait_notice() {
    let (coordinator, _registry) = in_memory();
    let holder = coordinator.register(request("run-a")).await.unwrap();
    let mut events = coordinator.publisher().subscribe();

    let err = coordinator
        .wait("production", "api-stack", Duration::from_secs(90))
        .await
        .unwrap_err();
    assert!(matches!(err, ShipyardError::TimedOut { .. }));

    let events = drain_events(&mut events);
    let waits: Vec<_> = events
        .iter()
        .filter(|event| event.kind() == NotificationKind::ConcurrentWait)
        .collect();
    assert_eq!(waits.len(), 1);
    match waits[0] {
        DeploymentEvent::ConcurrentWait {
            blocking_correlation_id,
            estimated_wait,
            ..
        } => {
            assert_eq!(blocking_correlation_id, holder.correlation_id());
            assert!(!estimated_wait.is_known());
        }
        other => panic!("expected CONCURRENT_WAIT, got {other:?}"),
    }

    // a timeout never touches the holder
    let active = coordinator.get_active("production").await.unwrap().unwrap();
    assert_eq!(active.correlation_id, holder.correlation_id());
}

#[tokio::test(start_paused = true)]
async fn test_wait_returns_once_slot_is_released() {
    let (coordinator, _registry) = in_memory();
    let holder = coordinator.register(request("run-a")).await.unwrap();
    let mut events = coordinator.publisher().subscribe();

    let releaser = {
        let coordinator = coordinator.clone();
        let correlation_id = holder.correlation_id().to_string();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(45)).await;
            coordinator.cleanup(&correlation_id).await
        })
    };

    let decision = coordinator
        .wait("production", "api-stack", Duration::from_secs(600))
        .await
        .unwrap();
    assert!(decision.allow);
    releaser.await.unwrap().unwrap();

    let events = drain_events(&mut events);
    assert_eq!(
        events
            .iter()
            .filter(|event| event.kind() == NotificationKind::ConcurrentWait)
            .count(),
        1
    );
}

#[tokio::test]
async fn test_wait_on_free_environment_returns_immediately() {
    let (coordinator, _registry) = in_memory();
    let mut events = coordinator.publisher().subscribe();

    let decision = coordinator
        .wait("production", "api-stack", Duration::from_secs(1))
        .await
        .unwrap();
    assert!(decision.allow);
    assert!(drain_events(&mut events).is_empty());
}

#[tokio::test]
async fn test_dropped_guard_releases_slot() {
    let (coordinator, _registry) = in_memory();
    {
        let guard = coordinator.register_guarded(request("run-a")).await.unwrap();
        assert_eq!(guard.phase(), CoordinatorPhase::Admitted);
    }

    let mut released = false;
    for _ in 0..50 {
        if coordinator.get_active("production").await.unwrap().is_none() {
            released = true;
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(released);
}

#[tokio::test]
async fn test_guard_finish_releases_started_deployment() {
    let (coordinator, registry) = in_memory();
    let mut guard = coordinator.register_guarded(request("run-a")).await.unwrap();
    guard.start().await.unwrap();
    assert_eq!(guard.phase(), CoordinatorPhase::Running);

    let correlation_id = guard.correlation_id().to_string();
    let running = registry.get(&correlation_id).await.unwrap().unwrap();
    assert_eq!(running.status, DeploymentStatus::InProgress);

    let released = guard.finish().await.unwrap().unwrap();
    assert_eq!(released.correlation_id, correlation_id);
    assert!(coordinator.get_active("production").await.unwrap().is_none());
}

#[tokio::test]
async fn test_degraded_mode_refuses_busy_target() {
    let registry = Arc::new(InMemoryRegistryStore::default());
    let feed = Arc::new(ScriptedStatusFeed::new());
    let coordinator = coordinator_over(registry.clone(), feed.clone());
    registry.set_available(false);
    feed.set_default_status("UPDATE_IN_PROGRESS");

    let decision = coordinator
        .can_deploy("production", "api-stack")
        .await
        .unwrap();
    assert!(!decision.allow);
    assert!(decision.degraded);
    assert_eq!(
        decision.blocking_correlation_id(),
        Some(shipyard_core::system_constants::UNKNOWN)
    );

    feed.set_default_status("UPDATE_COMPLETE");
    let decision = coordinator
        .can_deploy("production", "api-stack")
        .await
        .unwrap();
    assert!(decision.allow);
    assert!(decision.degraded);
}

#[tokio::test]
async fn test_stale_records_are_purged_from_file_store() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(FileRegistryStore::open(dir.path(), 10).unwrap());
    let coordinator = coordinator_over(registry.clone(), Arc::new(ScriptedStatusFeed::new()));
    let admission = coordinator.register(request("run-a")).await.unwrap();

    assert!(registry
        .purge_stale(Duration::from_secs(3600))
        .await
        .unwrap()
        .is_empty());

    tokio::time::sleep(Duration::from_millis(20)).await;
    let purged = registry.purge_stale(Duration::from_millis(1)).await.unwrap();
    assert_eq!(purged.len(), 1);
    assert_eq!(purged[0].correlation_id, admission.correlation_id());
    assert!(coordinator
        .can_deploy("production", "api-stack")
        .await
        .unwrap()
        .allow);
}
