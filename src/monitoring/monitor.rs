//! # Deployment Monitor
//!
//! Polling loop for one admitted deployment. Each poll classifies the external
//! status and decides between PROGRESS, STALLED and a terminal event.
//!
//! Emission state lives behind an `Arc` owned by the monitor rather than by the
//! running loop. When the supervisor restarts a crashed loop the new incarnation
//! sees the same flags, so STALLED and the terminal event are still emitted at
//! most once per deployment.

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::feed::{ExternalOutcome, ExternalStatus, FeedQuery, StatusFeed, TerminalStatusSet};
use crate::config::MonitorConfig;
use crate::constants::DeploymentStatus;
use crate::error::Result;
use crate::estimation::Estimator;
use crate::events::{DeploymentEvent, EventPublisher};
use crate::logging::log_monitor_operation;
use crate::metrics;
use crate::models::{DeploymentRecord, HistoricalSample, SampleOutcome};
use crate::registry::RegistryStore;

/// Shared collaborators handed to every monitor
#[derive(Debug, Clone)]
pub struct MonitorDependencies {
    pub registry: Arc<dyn RegistryStore>,
    pub feed: Arc<dyn StatusFeed>,
    pub terminal_statuses: TerminalStatusSet,
    pub estimator: Estimator,
    pub publisher: EventPublisher,
    pub config: MonitorConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug)]
struct EmissionState {
    started: Instant,
    /// Deployment age when monitoring began
    initial_elapsed: Duration,
    last_event_at: Option<DateTime<Utc>>,
    last_change: Instant,
    /// Age of the newest external event when the monitor first saw it. Counted
    /// towards the stall clock until the next event arrives.
    carried_age: Duration,
    stall_emitted: bool,
    terminal_emitted: bool,
    last_progress: Option<Instant>,
    polls: u64,
}

#[derive(Debug)]
pub struct DeploymentMonitor {
    record: DeploymentRecord,
    query: FeedQuery,
    deps: MonitorDependencies,
    state: Arc<Mutex<EmissionState>>,
}

impl DeploymentMonitor {
    pub fn new(record: DeploymentRecord, deps: MonitorDependencies) -> Self {
        let now = Instant::now();
        let query = FeedQuery {
            target_name: record.target_name.clone(),
            external_run_ref: Some(record.external_run_ref.clone())
                .filter(|run_ref| !run_ref.is_empty()),
        };
        let state = EmissionState {
            started: now,
            initial_elapsed: record.elapsed(),
            last_event_at: None,
            last_change: now,
            carried_age: Duration::ZERO,
            stall_emitted: false,
            terminal_emitted: false,
            last_progress: None,
            polls: 0,
        };
        Self {
            record,
            query,
            deps,
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.record.correlation_id
    }

    pub fn target_name(&self) -> &str {
        &self.record.target_name
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.deps.config
    }

    /// Number of successful polls across all incarnations
    pub fn polls(&self) -> u64 {
        self.state.lock().polls
    }

    /// Run one incarnation of the polling loop.
    ///
    /// Returns when the orchestrator reports a terminal status or `cancel` flips
    /// to `true`. Feed errors never end the loop.
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) -> Result<MonitorOutcome> {
        let mut ticker = interval(self.deps.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut consecutive_errors: u32 = 0;

        log_monitor_operation(
            "poll_loop",
            self.correlation_id(),
            self.target_name(),
            "started",
            None,
        );

        loop {
            tokio::select! {
                _ = cancelled(&mut cancel) => return Ok(self.stop_cancelled()),
                _ = ticker.tick() => {}
            }

            match self.deps.feed.fetch_status(&self.query).await {
                Ok(status) => {
                    consecutive_errors = 0;
                    if let Some(outcome) = self.observe(status).await {
                        return Ok(outcome);
                    }
                }
                Err(e) => {
                    consecutive_errors = consecutive_errors.saturating_add(1);
                    let backoff = self.deps.config.transient_backoff(consecutive_errors);
                    warn!(
                        correlation_id = %self.record.correlation_id,
                        target_name = %self.record.target_name,
                        consecutive_errors = consecutive_errors,
                        backoff_secs = backoff.as_secs(),
                        error = %e,
                        "Status poll failed, backing off"
                    );
                    tokio::select! {
                        _ = cancelled(&mut cancel) => return Ok(self.stop_cancelled()),
                        _ = sleep(backoff) => {}
                    }
                }
            }
        }
    }

    fn stop_cancelled(&self) -> MonitorOutcome {
        log_monitor_operation(
            "poll_loop",
            self.correlation_id(),
            self.target_name(),
            "cancelled",
            None,
        );
        MonitorOutcome::Cancelled
    }

    async fn observe(&self, status: ExternalStatus) -> Option<MonitorOutcome> {
        let now = Instant::now();
        let outcome = self.deps.terminal_statuses.classify(&status.status);

        let (elapsed, advanced, since_change) = {
            let mut state = self.state.lock();
            state.polls += 1;
            let advanced = status.last_event_at != state.last_event_at;
            if advanced {
                state.carried_age = if state.last_event_at.is_none() {
                    event_age(status.last_event_at)
                } else {
                    Duration::ZERO
                };
                state.last_event_at = status.last_event_at;
                state.last_change = now;
            }
            (
                state.initial_elapsed + now.duration_since(state.started),
                advanced,
                state.carried_age + now.duration_since(state.last_change),
            )
        };

        debug!(
            correlation_id = %self.record.correlation_id,
            external_status = %status.status,
            advanced = advanced,
            since_change_secs = since_change.as_secs(),
            "Polled external status"
        );

        match outcome {
            ExternalOutcome::Succeeded => {
                self.finish(outcome, &status, elapsed).await;
                Some(MonitorOutcome::Completed)
            }
            ExternalOutcome::Failed => {
                self.finish(outcome, &status, elapsed).await;
                Some(MonitorOutcome::Failed)
            }
            ExternalOutcome::InProgress => {
                if advanced {
                    self.on_progress(elapsed, now).await;
                } else if since_change >= self.deps.config.stall_threshold() {
                    self.on_stall(since_change).await;
                }
                None
            }
        }
    }

    async fn on_progress(&self, elapsed: Duration, now: Instant) {
        let emit = {
            let mut state = self.state.lock();
            let due = match state.last_progress {
                Some(last) => now.duration_since(last) >= self.deps.config.progress_interval(),
                None => true,
            };
            if due {
                state.last_progress = Some(now);
            }
            due
        };

        self.refresh_registry().await;

        if emit {
            let estimate = self
                .deps
                .estimator
                .estimate(&self.record.target_name, elapsed);
            self.deps.publisher.publish_or_log(DeploymentEvent::Progress {
                correlation_id: self.record.correlation_id.clone(),
                elapsed,
                estimate,
            });
        }
    }

    /// Keep the registry record fresh while external events keep arriving, moving a
    /// stalled deployment back to IN_PROGRESS. A PENDING record belongs to the
    /// coordinator and is left alone.
    async fn refresh_registry(&self) {
        let correlation_id = &self.record.correlation_id;
        match self.deps.registry.get(correlation_id).await {
            Ok(Some(record))
                if matches!(
                    record.status,
                    DeploymentStatus::InProgress | DeploymentStatus::Stalled
                ) =>
            {
                if let Err(e) = self
                    .deps
                    .registry
                    .update_status(correlation_id, DeploymentStatus::InProgress)
                    .await
                {
                    warn!(
                        correlation_id = %correlation_id,
                        error = %e,
                        "Failed to refresh registry record"
                    );
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(
                    correlation_id = %correlation_id,
                    error = %e,
                    "Registry unavailable during poll"
                );
            }
        }
    }

    async fn on_stall(&self, since_change: Duration) {
        let first = {
            let mut state = self.state.lock();
            if state.stall_emitted {
                false
            } else {
                state.stall_emitted = true;
                true
            }
        };
        if !first {
            return;
        }

        metrics::stalls_total().add(
            1,
            &[KeyValue::new("target_name", self.record.target_name.clone())],
        );
        log_monitor_operation(
            "stall_detection",
            self.correlation_id(),
            self.target_name(),
            "stalled",
            Some(&format!("no external event for {}s", since_change.as_secs())),
        );

        if let Err(e) = self
            .deps
            .registry
            .update_status(&self.record.correlation_id, DeploymentStatus::Stalled)
            .await
        {
            warn!(
                correlation_id = %self.record.correlation_id,
                error = %e,
                "Could not mark deployment as stalled in registry"
            );
        }

        self.deps.publisher.publish_or_log(DeploymentEvent::Stalled {
            correlation_id: self.record.correlation_id.clone(),
            elapsed_since_last_event: since_change,
        });
    }

    async fn finish(&self, outcome: ExternalOutcome, status: &ExternalStatus, elapsed: Duration) {
        let first = {
            let mut state = self.state.lock();
            let first = !state.terminal_emitted;
            state.terminal_emitted = true;
            first
        };
        if !first {
            debug!(
                correlation_id = %self.record.correlation_id,
                "Terminal outcome already reported"
            );
            return;
        }

        let correlation_id = self.record.correlation_id.clone();
        let (event, registry_status, sample_outcome, label) = match outcome {
            ExternalOutcome::Failed => (
                DeploymentEvent::Failed {
                    correlation_id: correlation_id.clone(),
                    reason: format!("orchestrator reported {}", status.status),
                },
                DeploymentStatus::Failed,
                SampleOutcome::Failed,
                "failed",
            ),
            _ => (
                DeploymentEvent::Completed {
                    correlation_id: correlation_id.clone(),
                    total_duration: elapsed,
                },
                DeploymentStatus::Completed,
                SampleOutcome::Completed,
                "completed",
            ),
        };

        let sample = HistoricalSample::new(
            self.record.target_name.clone(),
            elapsed,
            status.per_resource_durations(),
            sample_outcome,
        );
        if let Err(e) = self.deps.estimator.record_outcome(sample) {
            warn!(
                correlation_id = %correlation_id,
                error = %e,
                "Failed to record historical sample"
            );
        }

        if let Err(e) = self
            .deps
            .registry
            .update_status(&correlation_id, registry_status)
            .await
        {
            warn!(
                correlation_id = %correlation_id,
                status = %registry_status,
                error = %e,
                "Could not record terminal status in registry"
            );
        }

        metrics::terminal_events_total().add(
            1,
            &[
                KeyValue::new("target_name", self.record.target_name.clone()),
                KeyValue::new("outcome", label),
            ],
        );
        log_monitor_operation(
            "terminal",
            &correlation_id,
            self.target_name(),
            label,
            Some(&format!("after {}s", elapsed.as_secs())),
        );

        self.deps.publisher.publish_or_log(event);
    }

    /// Raise the single MONITORING_DEGRADED notification
    pub(crate) fn report_degraded(&self, restarts: u32) {
        log_monitor_operation(
            "supervisor",
            self.correlation_id(),
            self.target_name(),
            "degraded",
            Some(&format!("gave up after {restarts} restarts")),
        );
        self.deps
            .publisher
            .publish_or_log(DeploymentEvent::MonitoringDegraded {
                correlation_id: self.record.correlation_id.clone(),
                restarts,
            });
    }
}

/// Wall-clock age of an external event. Timestamps ahead of the local clock count as fresh.
fn event_age(last_event_at: Option<DateTime<Utc>>) -> Duration {
    last_event_at
        .and_then(|at| (Utc::now() - at).to_std().ok())
        .unwrap_or_default()
}

/// Resolves once cancellation is requested. A dropped sender never cancels.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let result = cancel.wait_for(|cancelled| *cancelled).await.map(|_| ());
    if result.is_err() {
        std::future::pending::<()>().await;
    }
}
