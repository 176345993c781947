//! Slot release tied to scope.
//!
//! `cleanup` has to run on every exit path of a caller, including early returns,
//! panics and a cancelled future. [`CleanupGuard`] releases the slot on
//! `finish`/`abort`, and otherwise from `Drop` by spawning the cleanup onto the
//! current Tokio runtime. Without a runtime the record is left for the
//! maintenance purge.

use tokio::runtime::Handle;
use tracing::{debug, warn};

use super::coordinator::Coordinator;
use super::decision::Admission;
use crate::constants::CoordinatorPhase;
use crate::error::Result;
use crate::logging::log_error;
use crate::models::DeploymentRecord;

#[derive(Debug)]
pub struct CleanupGuard {
    coordinator: Coordinator,
    admission: Admission,
    phase: CoordinatorPhase,
    released: bool,
}

impl CleanupGuard {
    pub(crate) fn new(coordinator: Coordinator, admission: Admission) -> Self {
        Self {
            coordinator,
            admission,
            phase: CoordinatorPhase::Admitted,
            released: false,
        }
    }

    pub fn record(&self) -> &DeploymentRecord {
        &self.admission.record
    }

    pub fn correlation_id(&self) -> &str {
        self.admission.correlation_id()
    }

    pub fn is_durable(&self) -> bool {
        self.admission.durable
    }

    pub fn phase(&self) -> CoordinatorPhase {
        self.phase
    }

    fn advance(&mut self, next: CoordinatorPhase) {
        if self.phase.can_transition_to(next) {
            debug!(
                correlation_id = %self.admission.record.correlation_id,
                from = ?self.phase,
                to = ?next,
                "Coordinator phase change"
            );
            self.phase = next;
        }
    }

    /// ADMITTED -> RUNNING; moves the registry record to IN_PROGRESS
    pub async fn start(&mut self) -> Result<()> {
        if self.admission.durable {
            let record = self.coordinator.start(self.correlation_id()).await?;
            self.admission.record = record;
        }
        self.advance(CoordinatorPhase::Running);
        Ok(())
    }

    /// Normal exit: release the slot now. Finishing without having started counts
    /// as an abort.
    pub async fn finish(mut self) -> Result<Option<DeploymentRecord>> {
        let next = if self.phase == CoordinatorPhase::Running {
            CoordinatorPhase::Done
        } else {
            CoordinatorPhase::Aborted
        };
        self.advance(next);
        self.release().await
    }

    /// Give up before or during the deployment and release the slot now
    pub async fn abort(mut self) -> Result<Option<DeploymentRecord>> {
        self.advance(CoordinatorPhase::Aborted);
        self.release().await
    }

    async fn release(&mut self) -> Result<Option<DeploymentRecord>> {
        self.released = true;
        if !self.admission.durable {
            return Ok(None);
        }
        self.coordinator
            .cleanup(&self.admission.record.correlation_id)
            .await
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if self.released || !self.admission.durable {
            return;
        }
        self.advance(CoordinatorPhase::Aborted);

        let correlation_id = self.admission.record.correlation_id.clone();
        match Handle::try_current() {
            Ok(handle) => {
                let coordinator = self.coordinator.clone();
                handle.spawn(async move {
                    if let Err(e) = coordinator.cleanup(&correlation_id).await {
                        log_error(
                            "coordinator",
                            "guard_cleanup",
                            &e.to_string(),
                            Some(&correlation_id),
                        );
                    }
                });
            }
            Err(_) => warn!(
                correlation_id = %correlation_id,
                "No async runtime to release slot; stale purge will reclaim it"
            ),
        }
    }
}
