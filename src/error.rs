//! Error types for the Shipyard coordination core.
//!
//! The first five variants are the operational taxonomy callers are expected to
//! branch on. Everything below them signals a programming or environment problem.

use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigurationError;
use crate::constants::DeploymentStatus;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ShipyardError {
    /// Another deployment already holds the environment slot
    #[error("Environment {environment} is busy with deployment {blocking_correlation_id}")]
    Conflict {
        environment: String,
        blocking_correlation_id: String,
    },

    /// The registry or a transport could not be reached
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// `wait` exceeded the caller's budget
    #[error("Timed out after {waited:?} waiting for environment {environment}")]
    TimedOut {
        environment: String,
        waited: Duration,
    },

    /// Notification retries were used up
    #[error("Delivery of message {message_id} exhausted after {attempts} attempts")]
    Exhausted { message_id: String, attempts: u32 },

    /// Monitor restart budget was exceeded
    #[error("Monitor for {correlation_id} exceeded its restart budget ({restarts} restarts)")]
    CrashLoop {
        correlation_id: String,
        restarts: u32,
    },

    #[error("Invalid status transition for {correlation_id}: {from} -> {to}")]
    InvalidTransition {
        correlation_id: String,
        from: DeploymentStatus,
        to: DeploymentStatus,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl ShipyardError {
    /// Whether waiting and trying again can resolve the error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::Unavailable(_) | Self::TimedOut { .. }
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<serde_json::Error> for ShipyardError {
    fn from(error: serde_json::Error) -> Self {
        ShipyardError::Serialization(format!("JSON serialization error: {error}"))
    }
}

impl From<ConfigurationError> for ShipyardError {
    fn from(error: ConfigurationError) -> Self {
        ShipyardError::Configuration(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ShipyardError>;
