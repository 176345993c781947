//! # Monitor Supervisor
//!
//! Runs each [`DeploymentMonitor`] incarnation in its own task and restarts it
//! when it panics or returns an error, as long as the restarts inside the
//! sliding window stay within budget. Over budget the supervisor raises a single
//! MONITORING_DEGRADED notification and gives up; the deployment itself is not
//! touched.

use opentelemetry::KeyValue;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{info, warn};

use super::monitor::{DeploymentMonitor, MonitorDependencies, MonitorOutcome};
use crate::error::{Result, ShipyardError};
use crate::metrics;
use crate::models::DeploymentRecord;

/// Spawns supervised monitors sharing one set of dependencies
#[derive(Debug, Clone)]
pub struct MonitorSupervisor {
    deps: MonitorDependencies,
}

impl MonitorSupervisor {
    pub fn new(deps: MonitorDependencies) -> Self {
        Self { deps }
    }

    pub fn dependencies(&self) -> &MonitorDependencies {
        &self.deps
    }

    /// Start monitoring an admitted deployment
    pub fn spawn(&self, record: DeploymentRecord) -> MonitorHandle {
        let correlation_id = record.correlation_id.clone();
        let monitor = Arc::new(DeploymentMonitor::new(record, self.deps.clone()));
        let (cancel_tx, cancel_rx) = watch::channel(false);

        info!(
            correlation_id = %correlation_id,
            target_name = %monitor.target_name(),
            poll_interval_secs = self.deps.config.poll_interval_seconds,
            "Spawning supervised monitor"
        );

        let task = tokio::spawn(supervise(Arc::clone(&monitor), cancel_rx));
        MonitorHandle {
            correlation_id,
            monitor,
            cancel: cancel_tx,
            task,
        }
    }
}

/// Owner-side handle of a supervised monitor.
///
/// Dropping the handle detaches the monitor; it keeps running to its terminal event.
#[derive(Debug)]
pub struct MonitorHandle {
    correlation_id: String,
    monitor: Arc<DeploymentMonitor>,
    cancel: watch::Sender<bool>,
    task: JoinHandle<Result<MonitorOutcome>>,
}

impl MonitorHandle {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Successful polls so far, across restarts
    pub fn polls(&self) -> u64 {
        self.monitor.polls()
    }

    /// Stop monitoring at the next await point. Registry state is left untouched.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self) -> Result<MonitorOutcome> {
        self.task.await.map_err(|e| {
            ShipyardError::Unavailable(format!(
                "supervisor for {} ended abnormally: {e}",
                self.correlation_id
            ))
        })?
    }
}

async fn supervise(
    monitor: Arc<DeploymentMonitor>,
    cancel: watch::Receiver<bool>,
) -> Result<MonitorOutcome> {
    let max_restarts = monitor.config().max_restarts as usize;
    let window = monitor.config().restart_window();
    let mut recent_restarts: VecDeque<Instant> = VecDeque::new();
    let mut total_restarts: u32 = 0;

    loop {
        let incarnation = {
            let monitor = Arc::clone(&monitor);
            let cancel = cancel.clone();
            tokio::spawn(async move { monitor.run(cancel).await })
        };

        let reason = match incarnation.await {
            Ok(Ok(outcome)) => return Ok(outcome),
            Ok(Err(e)) => e.to_string(),
            Err(e) if e.is_panic() => panic_reason(e),
            Err(_) => return Ok(MonitorOutcome::Cancelled),
        };

        if *cancel.borrow() {
            return Ok(MonitorOutcome::Cancelled);
        }

        let now = Instant::now();
        while recent_restarts
            .front()
            .is_some_and(|restarted| now.duration_since(*restarted) >= window)
        {
            recent_restarts.pop_front();
        }

        if recent_restarts.len() >= max_restarts {
            warn!(
                correlation_id = %monitor.correlation_id(),
                restarts = total_restarts,
                window_secs = window.as_secs(),
                reason = %reason,
                "Monitor restart budget exhausted"
            );
            monitor.report_degraded(total_restarts);
            return Err(ShipyardError::CrashLoop {
                correlation_id: monitor.correlation_id().to_string(),
                restarts: total_restarts,
            });
        }

        recent_restarts.push_back(now);
        total_restarts += 1;
        metrics::monitor_restarts_total().add(
            1,
            &[KeyValue::new("target_name", monitor.target_name().to_string())],
        );
        warn!(
            correlation_id = %monitor.correlation_id(),
            target_name = %monitor.target_name(),
            restart = total_restarts,
            reason = %reason,
            "Monitor died, restarting"
        );
    }
}

fn panic_reason(error: JoinError) -> String {
    let payload = error.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}
