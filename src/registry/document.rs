//! Per-environment registry document and the pure mutations applied to it.
//!
//! Stores wrap these mutations in their own locking and persistence; keeping the
//! rules here means the file-backed and in-memory stores cannot drift apart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::DeploymentStatus;
use crate::error::{Result, ShipyardError};
use crate::models::DeploymentRecord;

/// Correlation ids of archived records that fell off the end of `recent`.
/// Stores drop these from their lookup index.
pub type Evicted = Vec<String>;

/// Everything the registry knows about one environment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentDocument {
    pub environment: String,
    /// Slot holder. May carry a terminal status until cleanup archives it.
    pub active: Option<DeploymentRecord>,
    /// Archived records, newest last
    pub recent: Vec<DeploymentRecord>,
}

impl EnvironmentDocument {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            active: None,
            recent: Vec::new(),
        }
    }

    /// The slot holder if it still occupies the slot
    pub fn active_record(&self) -> Option<&DeploymentRecord> {
        self.active.as_ref().filter(|record| record.is_active())
    }

    pub fn find(&self, correlation_id: &str) -> Option<&DeploymentRecord> {
        self.active
            .iter()
            .chain(self.recent.iter())
            .find(|record| record.correlation_id == correlation_id)
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_none() && self.recent.is_empty()
    }

    /// Upsert. Re-putting the slot holder's own correlation id is allowed; any other
    /// record is rejected while the slot is occupied.
    pub fn put(&mut self, record: DeploymentRecord, recent_limit: usize) -> Result<Evicted> {
        self.check_environment(&record)?;
        if let Some(current) = self.active_record() {
            if current.correlation_id != record.correlation_id {
                return Err(ShipyardError::Conflict {
                    environment: self.environment.clone(),
                    blocking_correlation_id: current.correlation_id.clone(),
                });
            }
            self.active = Some(record);
            return Ok(Evicted::new());
        }

        // a finished slot holder that was never cleaned up gets archived
        let mut evicted = Evicted::new();
        if let Some(finished) = self.active.take() {
            if finished.correlation_id != record.correlation_id {
                evicted = self.archive(finished, recent_limit);
            }
        }
        self.active = Some(record);
        Ok(evicted)
    }

    /// Install `record` unconditionally, archiving the displaced holder as FAILED
    pub fn force_put(
        &mut self,
        record: DeploymentRecord,
        recent_limit: usize,
    ) -> Result<(Option<DeploymentRecord>, Evicted)> {
        self.check_environment(&record)?;
        let (displaced, evicted) = match self.active.take() {
            Some(mut previous) if previous.correlation_id != record.correlation_id => {
                if previous.is_active() {
                    previous.transition_to(DeploymentStatus::Failed)?;
                }
                let evicted = self.archive(previous.clone(), recent_limit);
                (Some(previous), evicted)
            }
            _ => (None, Evicted::new()),
        };
        self.active = Some(record);
        Ok((displaced, evicted))
    }

    pub fn update_status(
        &mut self,
        correlation_id: &str,
        status: DeploymentStatus,
    ) -> Result<DeploymentRecord> {
        match self.active.as_mut() {
            Some(record) if record.correlation_id == correlation_id => {
                record.transition_to(status)?;
                Ok(record.clone())
            }
            _ => match self.find(correlation_id) {
                Some(archived) => Err(ShipyardError::InvalidTransition {
                    correlation_id: correlation_id.to_string(),
                    from: archived.status,
                    to: status,
                }),
                None => Err(ShipyardError::NotFound(format!(
                    "deployment {correlation_id} in environment {}",
                    self.environment
                ))),
            },
        }
    }

    /// Release the slot if `correlation_id` holds it. Active records are archived
    /// as FAILED (the caller left before the deployment finished).
    pub fn remove(
        &mut self,
        correlation_id: &str,
        recent_limit: usize,
    ) -> Result<(Option<DeploymentRecord>, Evicted)> {
        let holds_slot = self
            .active
            .as_ref()
            .is_some_and(|record| record.correlation_id == correlation_id);
        if !holds_slot {
            return Ok((None, Evicted::new()));
        }
        let Some(mut record) = self.active.take() else {
            return Ok((None, Evicted::new()));
        };
        if record.is_active() {
            record.transition_to(DeploymentStatus::Failed)?;
        } else {
            record.touch();
        }
        let evicted = self.archive(record.clone(), recent_limit);
        Ok((Some(record), evicted))
    }

    /// Drop every record last updated before `cutoff`, whatever its status
    pub fn purge_stale(&mut self, cutoff: DateTime<Utc>) -> Vec<DeploymentRecord> {
        let mut purged = Vec::new();
        if self
            .active
            .as_ref()
            .is_some_and(|record| record.is_stale(cutoff))
        {
            purged.extend(self.active.take());
        }
        let (stale, fresh): (Vec<_>, Vec<_>) = std::mem::take(&mut self.recent)
            .into_iter()
            .partition(|record| record.is_stale(cutoff));
        self.recent = fresh;
        purged.extend(stale);
        purged
    }

    fn archive(&mut self, record: DeploymentRecord, recent_limit: usize) -> Evicted {
        self.recent.retain(|r| r.correlation_id != record.correlation_id);
        self.recent.push(record);
        let excess = self.recent.len().saturating_sub(recent_limit);
        self.recent
            .drain(..excess)
            .map(|dropped| dropped.correlation_id)
            .collect()
    }

    fn check_environment(&self, record: &DeploymentRecord) -> Result<()> {
        if record.environment != self.environment {
            return Err(ShipyardError::Validation(format!(
                "record for environment {} written to partition {}",
                record.environment, self.environment
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeploymentRequest;

    fn record(env: &str) -> DeploymentRecord {
        DeploymentRecord::new(&DeploymentRequest::new(env, "api-stack", "run"))
    }

    #[test]
    fn test_put_conflicts_with_other_active_record() {
        let mut doc = EnvironmentDocument::new("production");
        let first = record("production");
        doc.put(first.clone(), 10).unwrap();

        let err = doc.put(record("production"), 10).unwrap_err();
        assert_eq!(
            err,
            ShipyardError::Conflict {
                environment: "production".to_string(),
                blocking_correlation_id: first.correlation_id.clone(),
            }
        );
    }

    #[test]
    fn test_put_same_correlation_id_is_upsert() {
        let mut doc = EnvironmentDocument::new("staging");
        let mut first = record("staging");
        doc.put(first.clone(), 10).unwrap();
        first.transition_to(DeploymentStatus::InProgress).unwrap();
        doc.put(first.clone(), 10).unwrap();
        assert_eq!(
            doc.active_record().map(|r| r.status),
            Some(DeploymentStatus::InProgress)
        );
    }

    #[test]
    fn test_terminal_holder_does_not_block_and_is_archived() {
        let mut doc = EnvironmentDocument::new("staging");
        let first = record("staging");
        doc.put(first.clone(), 10).unwrap();
        doc.update_status(&first.correlation_id, DeploymentStatus::InProgress)
            .unwrap();
        doc.update_status(&first.correlation_id, DeploymentStatus::Completed)
            .unwrap();
        assert!(doc.active_record().is_none());

        let second = record("staging");
        doc.put(second.clone(), 10).unwrap();
        assert_eq!(doc.recent.len(), 1);
        assert_eq!(doc.recent[0].correlation_id, first.correlation_id);
    }

    #[test]
    fn test_remove_is_idempotent_and_archives() {
        let mut doc = EnvironmentDocument::new("staging");
        let first = record("staging");
        doc.put(first.clone(), 10).unwrap();

        let (archived, evicted) = doc.remove(&first.correlation_id, 10).unwrap();
        assert_eq!(archived.unwrap().status, DeploymentStatus::Failed);
        assert!(evicted.is_empty());
        assert!(doc.remove(&first.correlation_id, 10).unwrap().0.is_none());
        assert!(doc.remove("never-existed", 10).unwrap().0.is_none());
        assert!(doc.active.is_none());
    }

    #[test]
    fn test_force_put_displaces_holder() {
        let mut doc = EnvironmentDocument::new("production");
        let first = record("production");
        doc.put(first.clone(), 10).unwrap();
        let second = record("production");
        let displaced = doc.force_put(second.clone(), 10).unwrap().0.unwrap();
        assert_eq!(displaced.correlation_id, first.correlation_id);
        assert_eq!(displaced.status, DeploymentStatus::Failed);
        assert_eq!(
            doc.active_record().map(|r| r.correlation_id.clone()),
            Some(second.correlation_id)
        );
    }

    #[test]
    fn test_purge_ignores_status() {
        let mut doc = EnvironmentDocument::new("staging");
        let mut stuck = record("staging");
        stuck.updated_at = Utc::now() - chrono::Duration::days(10);
        doc.active = Some(stuck.clone());
        let mut old = record("staging");
        old.status = DeploymentStatus::Completed;
        old.updated_at = Utc::now() - chrono::Duration::days(9);
        doc.recent.push(old);
        doc.recent.push(record("staging"));

        let purged = doc.purge_stale(Utc::now() - chrono::Duration::days(7));
        assert_eq!(purged.len(), 2);
        assert!(doc.active.is_none());
        assert_eq!(doc.recent.len(), 1);
    }

    #[test]
    fn test_recent_is_bounded_and_reports_evictions() {
        let mut doc = EnvironmentDocument::new("staging");
        let mut ids = Vec::new();
        let mut evicted = Vec::new();
        for _ in 0..5 {
            let r = record("staging");
            ids.push(r.correlation_id.clone());
            evicted.extend(doc.put(r.clone(), 3).unwrap());
            evicted.extend(doc.remove(&r.correlation_id, 3).unwrap().1);
        }
        assert_eq!(doc.recent.len(), 3);
        assert_eq!(evicted, ids[..2].to_vec());
    }

    #[test]
    fn test_archiving_finished_holder_reports_evictions() {
        let mut doc = EnvironmentDocument::new("staging");
        let first = record("staging");
        doc.put(first.clone(), 1).unwrap();
        doc.remove(&first.correlation_id, 1).unwrap();

        let mut second = record("staging");
        second.status = DeploymentStatus::Completed;
        doc.active = Some(second.clone());
        let evicted = doc.put(record("staging"), 1).unwrap();
        assert_eq!(evicted, vec![first.correlation_id]);
        assert_eq!(doc.recent[0].correlation_id, second.correlation_id);
    }
}
