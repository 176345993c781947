//! # Deployment Record
//!
//! One deployment attempt as tracked by the registry. The record is the unit of
//! mutual exclusion: while its status is PENDING, IN_PROGRESS or STALLED it holds
//! its environment's slot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::DeploymentStatus;
use crate::error::{Result, ShipyardError};

/// What a caller asks the coordinator to admit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRequest {
    pub environment: String,
    pub target_name: String,
    pub external_run_ref: String,
}

impl DeploymentRequest {
    pub fn new(
        environment: impl Into<String>,
        target_name: impl Into<String>,
        external_run_ref: impl Into<String>,
    ) -> Self {
        Self {
            environment: environment.into(),
            target_name: target_name.into(),
            external_run_ref: external_run_ref.into(),
        }
    }

    /// Environment and target names double as file names in the durable store
    pub fn validate(&self) -> Result<()> {
        validate_name("environment", &self.environment)?;
        validate_name("target_name", &self.target_name)?;
        Ok(())
    }
}

pub(crate) fn validate_name(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(ShipyardError::Validation(format!("{field} must not be empty")));
    }
    if value.len() > 128 {
        return Err(ShipyardError::Validation(format!(
            "{field} must be at most 128 characters"
        )));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(ShipyardError::Validation(format!(
            "{field} '{value}' may only contain ASCII letters, digits, '-', '_' and '.'"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// Assigned at creation, never changes
    pub correlation_id: String,
    pub environment: String,
    pub target_name: String,
    pub external_run_ref: String,
    pub status: DeploymentStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeploymentRecord {
    /// New PENDING record with a fresh correlation id
    pub fn new(request: &DeploymentRequest) -> Self {
        let now = Utc::now();
        Self {
            correlation_id: uuid::Uuid::new_v4().to_string(),
            environment: request.environment.clone(),
            target_name: request.target_name.clone(),
            external_run_ref: request.external_run_ref.clone(),
            status: DeploymentStatus::Pending,
            started_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Apply a validated status change and refresh `updated_at`
    pub fn transition_to(&mut self, next: DeploymentStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(ShipyardError::InvalidTransition {
                correlation_id: self.correlation_id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Whether the record was last touched before `cutoff`
    pub fn is_stale(&self, cutoff: DateTime<Utc>) -> bool {
        self.updated_at < cutoff
    }

    /// Wall-clock time since the attempt started
    pub fn elapsed(&self) -> std::time::Duration {
        (Utc::now() - self.started_at)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> DeploymentRequest {
        DeploymentRequest::new("production", "api-stack", "run-1")
    }

    #[test]
    fn test_new_record_is_pending_with_unique_id() {
        let a = DeploymentRecord::new(&request());
        let b = DeploymentRecord::new(&request());
        assert_eq!(a.status, DeploymentStatus::Pending);
        assert!(a.is_active());
        assert_ne!(a.correlation_id, b.correlation_id);
        assert_eq!(a.started_at, a.updated_at);
    }

    #[test]
    fn test_transition_rejects_leaving_terminal_state() {
        let mut record = DeploymentRecord::new(&request());
        record.transition_to(DeploymentStatus::InProgress).unwrap();
        record.transition_to(DeploymentStatus::Completed).unwrap();
        let err = record
            .transition_to(DeploymentStatus::InProgress)
            .unwrap_err();
        assert!(matches!(err, ShipyardError::InvalidTransition { .. }));
        assert_eq!(record.status, DeploymentStatus::Completed);
    }

    #[test]
    fn test_request_validation() {
        assert!(request().validate().is_ok());
        assert!(DeploymentRequest::new("", "x", "r").validate().is_err());
        assert!(DeploymentRequest::new("prod/eu", "x", "r").validate().is_err());
        assert!(DeploymentRequest::new("prod", "api stack", "r")
            .validate()
            .is_err());
    }

    #[test]
    fn test_staleness_uses_updated_at() {
        let mut record = DeploymentRecord::new(&request());
        record.updated_at = Utc::now() - chrono::Duration::days(8);
        assert!(record.is_stale(Utc::now() - chrono::Duration::days(7)));
        record.touch();
        assert!(!record.is_stale(Utc::now() - chrono::Duration::days(7)));
    }
}
