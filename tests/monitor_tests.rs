//! Monitor and supervisor behaviour under Tokio's paused clock.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use shipyard_core::config::{EstimatorConfig, MonitorConfig};
use shipyard_core::constants::{DeploymentStatus, NotificationKind};
use shipyard_core::estimation::{Estimator, HistoricalStore};
use shipyard_core::events::{DeploymentEvent, EventPublisher};
use shipyard_core::models::{DeploymentRecord, DeploymentRequest};
use shipyard_core::monitoring::{
    ExternalStatus, FeedError, MonitorDependencies, MonitorOutcome, MonitorSupervisor,
    TerminalStatusSet,
};
use shipyard_core::registry::{InMemoryRegistryStore, RegistryStore};
use shipyard_core::test_helpers::{drain_events, event_at, in_progress, ScriptedStatusFeed};
use shipyard_core::ShipyardError;

struct Harness {
    registry: Arc<InMemoryRegistryStore>,
    feed: Arc<ScriptedStatusFeed>,
    history: Arc<HistoricalStore>,
    publisher: EventPublisher,
    supervisor: MonitorSupervisor,
}

fn harness() -> Harness {
    let registry = Arc::new(InMemoryRegistryStore::default());
    let feed = Arc::new(ScriptedStatusFeed::new());
    let history = Arc::new(HistoricalStore::in_memory(20));
    let publisher = EventPublisher::new(1024);
    let supervisor = MonitorSupervisor::new(MonitorDependencies {
        registry: registry.clone(),
        feed: feed.clone(),
        terminal_statuses: TerminalStatusSet::default(),
        estimator: Estimator::new(history.clone(), EstimatorConfig::default()),
        publisher: publisher.clone(),
        config: MonitorConfig::default(),
    });
    Harness {
        registry,
        feed,
        history,
        publisher,
        supervisor,
    }
}

/// A registered deployment that has already been started
async fn running_deployment(registry: &InMemoryRegistryStore) -> DeploymentRecord {
    let record = DeploymentRecord::new(&DeploymentRequest::new(
        "production",
        "api-stack",
        "run-8841",
    ));
    registry.put(record.clone()).await.unwrap();
    registry
        .update_status(&record.correlation_id, DeploymentStatus::InProgress)
        .await
        .unwrap()
}

fn count(events: &[DeploymentEvent], kind: NotificationKind) -> usize {
    events.iter().filter(|event| event.kind() == kind).count()
}

fn complete(step: i64) -> ExternalStatus {
    ExternalStatus::new("UPDATE_COMPLETE", Some(event_at(step)))
}

#[tokio::test(start_paused = true)]
async fn test_stall_is_reported_once() {
    let h = harness();
    let mut events = h.publisher.subscribe();
    let record = running_deployment(&h.registry).await;
    h.feed.set_fallback(in_progress(event_at(0)));

    let handle = h.supervisor.spawn(record.clone());
    tokio::time::sleep(Duration::from_secs(2 * 3600)).await;

    let stored = h.registry.get(&record.correlation_id).await.unwrap().unwrap();
    assert_eq!(stored.status, DeploymentStatus::Stalled);

    handle.cancel();
    assert_eq!(handle.join().await.unwrap(), MonitorOutcome::Cancelled);

    let events = drain_events(&mut events);
    assert_eq!(count(&events, NotificationKind::Stalled), 1);
    assert_eq!(count(&events, NotificationKind::Progress), 1);
    match events
        .iter()
        .find(|event| event.kind() == NotificationKind::Stalled)
    {
        Some(DeploymentEvent::Stalled {
            elapsed_since_last_event,
            ..
        }) => assert!(*elapsed_since_last_event >= Duration::from_secs(600)),
        other => panic!("expected a stall event, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_old_last_event_counts_towards_stall() {
    let h = harness();
    let mut events = h.publisher.subscribe();
    let record = running_deployment(&h.registry).await;
    let quiet_since = Utc::now() - chrono::Duration::minutes(15);
    h.feed.set_fallback(in_progress(quiet_since));

    // the second poll already sees fifteen quiet minutes
    let handle = h.supervisor.spawn(record);
    tokio::time::sleep(Duration::from_secs(45)).await;
    assert_eq!(handle.polls(), 2);
    handle.cancel();
    handle.join().await.unwrap();

    let events = drain_events(&mut events);
    match events
        .iter()
        .find(|event| event.kind() == NotificationKind::Stalled)
    {
        Some(DeploymentEvent::Stalled {
            elapsed_since_last_event,
            ..
        }) => assert!(*elapsed_since_last_event >= Duration::from_secs(15 * 60)),
        other => panic!("expected a stall event, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_future_event_timestamp_is_treated_as_fresh() {
    let h = harness();
    let mut events = h.publisher.subscribe();
    let record = running_deployment(&h.registry).await;
    h.feed
        .set_fallback(in_progress(Utc::now() + chrono::Duration::hours(1)));

    let handle = h.supervisor.spawn(record);
    tokio::time::sleep(Duration::from_secs(300)).await;
    handle.cancel();
    handle.join().await.unwrap();

    let events = drain_events(&mut events);
    assert_eq!(count(&events, NotificationKind::Stalled), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_deployment_resumes_without_second_stall() {
    let h = harness();
    let mut events = h.publisher.subscribe();
    let record = running_deployment(&h.registry).await;

    // polls every 30s: 25 polls without change, one advance, 25 more, then done
    for _ in 0..25 {
        h.feed.push_status(in_progress(event_at(0)));
    }
    for _ in 0..25 {
        h.feed.push_status(in_progress(event_at(1)));
    }
    h.feed.set_fallback(complete(2));

    let outcome = h.supervisor.spawn(record.clone()).join().await.unwrap();
    assert_eq!(outcome, MonitorOutcome::Completed);

    let events = drain_events(&mut events);
    assert_eq!(count(&events, NotificationKind::Stalled), 1);
    assert_eq!(count(&events, NotificationKind::Completed), 1);

    let stored = h.registry.get(&record.correlation_id).await.unwrap().unwrap();
    assert_eq!(stored.status, DeploymentStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_terminal_outcome_reported_exactly_once() {
    let h = harness();
    let mut events = h.publisher.subscribe();
    let record = running_deployment(&h.registry).await;
    h.feed.push_status(in_progress(event_at(1)));
    h.feed.push_status(in_progress(event_at(2)));
    h.feed.set_fallback(complete(3));

    let handle = h.supervisor.spawn(record.clone());
    assert_eq!(handle.join().await.unwrap(), MonitorOutcome::Completed);

    // the monitor has stopped; further successful statuses go unobserved
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(h.feed.polls(), 3);

    let events = drain_events(&mut events);
    assert_eq!(count(&events, NotificationKind::Completed), 1);
    assert!(events.last().is_some_and(DeploymentEvent::is_terminal));
    assert_eq!(h.history.sample_count("api-stack"), 1);

    let stored = h.registry.get(&record.correlation_id).await.unwrap().unwrap();
    assert_eq!(stored.status, DeploymentStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_failed_status_reports_failure() {
    let h = harness();
    let mut events = h.publisher.subscribe();
    let record = running_deployment(&h.registry).await;
    h.feed
        .set_fallback(ExternalStatus::new("UPDATE_ROLLBACK_COMPLETE", Some(event_at(1))));

    let outcome = h.supervisor.spawn(record.clone()).join().await.unwrap();
    assert_eq!(outcome, MonitorOutcome::Failed);

    let events = drain_events(&mut events);
    assert_eq!(count(&events, NotificationKind::Failed), 1);
    assert_eq!(count(&events, NotificationKind::Completed), 0);

    let stored = h.registry.get(&record.correlation_id).await.unwrap().unwrap();
    assert_eq!(stored.status, DeploymentStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_progress_is_throttled() {
    let h = harness();
    let mut events = h.publisher.subscribe();
    let record = running_deployment(&h.registry).await;

    // an external event on every poll for 270s, progress interval is 120s
    for step in 0..10 {
        h.feed.push_status(in_progress(event_at(step)));
    }
    h.feed.set_fallback(complete(10));

    let outcome = h.supervisor.spawn(record).join().await.unwrap();
    assert_eq!(outcome, MonitorOutcome::Completed);

    let events = drain_events(&mut events);
    assert_eq!(count(&events, NotificationKind::Progress), 3);
}

#[tokio::test(start_paused = true)]
async fn test_transient_feed_errors_do_not_end_monitoring() {
    let h = harness();
    let mut events = h.publisher.subscribe();
    let record = running_deployment(&h.registry).await;
    for _ in 0..3 {
        h.feed
            .push_error(FeedError::Transient("throttled".to_string()));
    }
    h.feed.set_fallback(complete(1));

    let handle = h.supervisor.spawn(record);
    assert_eq!(handle.join().await.unwrap(), MonitorOutcome::Completed);

    let events = drain_events(&mut events);
    assert_eq!(count(&events, NotificationKind::Completed), 1);
    assert_eq!(count(&events, NotificationKind::MonitoringDegraded), 0);
}

#[tokio::test(start_paused = true)]
async fn test_crashed_monitor_is_restarted() {
    let h = harness();
    let mut events = h.publisher.subscribe();
    let record = running_deployment(&h.registry).await;
    h.feed.push_status(in_progress(event_at(1)));
    h.feed.panic_on_poll(2);
    h.feed.set_fallback(complete(2));

    let outcome = h.supervisor.spawn(record).join().await.unwrap();
    assert_eq!(outcome, MonitorOutcome::Completed);
    assert_eq!(h.feed.polls(), 3);

    let events = drain_events(&mut events);
    assert_eq!(count(&events, NotificationKind::Completed), 1);
    assert_eq!(count(&events, NotificationKind::MonitoringDegraded), 0);
}

#[tokio::test(start_paused = true)]
async fn test_crash_loop_reports_degraded_monitoring() {
    let h = harness();
    let mut events = h.publisher.subscribe();
    let record = running_deployment(&h.registry).await;
    h.feed.always_panic();

    let result = h.supervisor.spawn(record.clone()).join().await;
    match result {
        Err(ShipyardError::CrashLoop {
            correlation_id,
            restarts,
        }) => {
            assert_eq!(correlation_id, record.correlation_id);
            assert_eq!(restarts, 5);
        }
        other => panic!("expected a crash loop, got {other:?}"),
    }
    assert_eq!(h.feed.polls(), 6);

    let events = drain_events(&mut events);
    assert_eq!(count(&events, NotificationKind::MonitoringDegraded), 1);
    assert_eq!(count(&events, NotificationKind::Completed), 0);

    // the registry slot is untouched; releasing it is the caller's job
    let stored = h.registry.get_active("production").await.unwrap().unwrap();
    assert_eq!(stored.correlation_id, record.correlation_id);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_polling_without_terminal_event() {
    let h = harness();
    let mut events = h.publisher.subscribe();
    let record = running_deployment(&h.registry).await;
    h.feed.set_fallback(in_progress(event_at(0)));

    let handle = h.supervisor.spawn(record.clone());
    tokio::time::sleep(Duration::from_secs(95)).await;
    assert_eq!(handle.polls(), 4);

    handle.cancel();
    assert_eq!(handle.join().await.unwrap(), MonitorOutcome::Cancelled);

    let polls_at_cancel = h.feed.polls();
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(h.feed.polls(), polls_at_cancel);

    let events = drain_events(&mut events);
    assert!(!events.iter().any(DeploymentEvent::is_terminal));
    assert_eq!(h.history.sample_count("api-stack"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_monitor_queries_the_target() {
    let h = harness();
    let record = running_deployment(&h.registry).await;
    h.feed.set_fallback(complete(1));

    h.supervisor.spawn(record).join().await.unwrap();

    let queries = h.feed.queries();
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0].target_name, "api-stack");
    assert_eq!(queries[0].external_run_ref.as_deref(), Some("run-8841"));
}
