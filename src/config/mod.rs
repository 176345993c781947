//! # Shipyard Configuration System
//!
//! Layered configuration for the coordination core. Poll intervals, stall
//! thresholds and retry budgets live here rather than in caller arguments so that
//! monitoring behaves the same for every caller.
//!
//! ## Layers
//!
//! 1. Built-in defaults ([`ShipyardConfig::default`])
//! 2. `config/shipyard.toml`
//! 3. `config/shipyard.<environment>.toml`
//! 4. `SHIPYARD__<SECTION>__<KEY>` environment variables
//!
//! ## Usage
//!
//! ```rust,no_run
//! use shipyard_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let poll = manager.config().monitor.poll_interval();
//! println!("polling every {poll:?} in {}", manager.environment());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring `config/shipyard.toml`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ShipyardConfig {
    /// Durable registry settings
    pub registry: RegistryConfig,

    /// Admission and waiting behaviour
    pub coordinator: CoordinatorConfig,

    /// Orchestrator polling, stall detection and supervision
    pub monitor: MonitorConfig,

    /// Completion-time estimation
    pub estimator: EstimatorConfig,

    /// Notification delivery and retry
    pub notifier: NotifierConfig,

    /// Periodic purge of stale registry records
    pub maintenance: MaintenanceConfig,

    /// Status vocabulary of the external orchestrator
    pub feed: FeedConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Root directory for registry documents and historical samples
    pub state_dir: PathBuf,
    /// Records untouched for longer than this are purged regardless of status
    pub retention_days: u64,
    /// Recently-completed records kept per environment
    pub recent_history_limit: usize,
}

impl RegistryConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days * 24 * 60 * 60)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("var/shipyard"),
            retention_days: 7,
            recent_history_limit: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub wait_poll_interval_seconds: u64,
}

impl CoordinatorConfig {
    pub fn wait_poll_interval(&self) -> Duration {
        Duration::from_secs(self.wait_poll_interval_seconds)
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            wait_poll_interval_seconds: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_interval_seconds: u64,
    pub stall_threshold_seconds: u64,
    /// Minimum spacing between PROGRESS notifications
    pub progress_interval_seconds: u64,
    pub max_restarts: u32,
    pub restart_window_seconds: u64,
    pub transient_backoff_base_seconds: u64,
    pub transient_backoff_max_seconds: u64,
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn stall_threshold(&self) -> Duration {
        Duration::from_secs(self.stall_threshold_seconds)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_seconds)
    }

    pub fn restart_window(&self) -> Duration {
        Duration::from_secs(self.restart_window_seconds)
    }

    /// Delay before retrying the `consecutive_errors`-th failed poll
    pub fn transient_backoff(&self, consecutive_errors: u32) -> Duration {
        let exponent = consecutive_errors.saturating_sub(1).min(16);
        let seconds = self
            .transient_backoff_base_seconds
            .saturating_mul(1u64 << exponent)
            .min(self.transient_backoff_max_seconds);
        Duration::from_secs(seconds)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 30,
            stall_threshold_seconds: 600,
            progress_interval_seconds: 120,
            max_restarts: 5,
            restart_window_seconds: 300,
            transient_backoff_base_seconds: 5,
            transient_backoff_max_seconds: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Samples kept per target (rolling window)
    pub sample_window: usize,
    /// Below this many samples the estimate is `Unknown`
    pub min_samples: usize,
    /// Half-width of the confidence band as a fraction of the baseline
    pub confidence_pct: f64,
    pub confidence_floor_seconds: u64,
}

impl EstimatorConfig {
    pub fn confidence_floor(&self) -> Duration {
        Duration::from_secs(self.confidence_floor_seconds)
    }
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            sample_window: 20,
            min_samples: 3,
            confidence_pct: 0.2,
            confidence_floor_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub base_delay_seconds: u64,
    pub max_attempts: u32,
    pub max_delay_seconds: u64,
    /// When set, pending messages and dead letters survive restarts
    pub spool_dir: Option<PathBuf>,
    /// How many delivered message ids are remembered for dedup
    pub delivered_id_memory: usize,
}

impl NotifierConfig {
    /// Delay scheduled after the `attempt`-th failed delivery (1-based)
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let seconds = self
            .base_delay_seconds
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_seconds);
        Duration::from_secs(seconds)
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            base_delay_seconds: 5,
            max_attempts: 5,
            max_delay_seconds: 80,
            spool_dir: None,
            delivered_id_memory: 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub enabled: bool,
    pub purge_interval_seconds: u64,
}

impl MaintenanceConfig {
    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_seconds)
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            purge_interval_seconds: 3600,
        }
    }
}

/// Raw status strings the orchestrator uses for terminal states
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FeedConfig {
    pub success_statuses: Vec<String>,
    pub failure_statuses: Vec<String>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            success_statuses: vec![
                "success".to_string(),
                "CREATE_COMPLETE".to_string(),
                "UPDATE_COMPLETE".to_string(),
                "IMPORT_COMPLETE".to_string(),
            ],
            failure_statuses: vec![
                "failure".to_string(),
                "CREATE_FAILED".to_string(),
                "UPDATE_FAILED".to_string(),
                "DELETE_FAILED".to_string(),
                "ROLLBACK_COMPLETE".to_string(),
                "ROLLBACK_FAILED".to_string(),
                "UPDATE_ROLLBACK_COMPLETE".to_string(),
                "UPDATE_ROLLBACK_FAILED".to_string(),
            ],
        }
    }
}

impl ShipyardConfig {
    /// Reject values that would make a loop spin or a budget meaningless
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.registry.state_dir.as_os_str().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "registry.state_dir",
                "registry configuration",
            ));
        }

        if self.registry.retention_days == 0 {
            return Err(ConfigurationError::invalid_value(
                "registry.retention_days",
                "0",
                "retention must be at least one day",
            ));
        }

        let positive_intervals = [
            (
                "coordinator.wait_poll_interval_seconds",
                self.coordinator.wait_poll_interval_seconds,
            ),
            (
                "monitor.poll_interval_seconds",
                self.monitor.poll_interval_seconds,
            ),
            (
                "monitor.stall_threshold_seconds",
                self.monitor.stall_threshold_seconds,
            ),
            (
                "monitor.restart_window_seconds",
                self.monitor.restart_window_seconds,
            ),
            (
                "monitor.transient_backoff_base_seconds",
                self.monitor.transient_backoff_base_seconds,
            ),
            (
                "notifier.base_delay_seconds",
                self.notifier.base_delay_seconds,
            ),
            (
                "maintenance.purge_interval_seconds",
                self.maintenance.purge_interval_seconds,
            ),
        ];
        for (field, value) in positive_intervals {
            if value == 0 {
                return Err(ConfigurationError::invalid_value(
                    field,
                    "0",
                    "interval must be greater than 0",
                ));
            }
        }

        if self.monitor.transient_backoff_max_seconds < self.monitor.transient_backoff_base_seconds
        {
            return Err(ConfigurationError::invalid_value(
                "monitor.transient_backoff_max_seconds",
                self.monitor.transient_backoff_max_seconds.to_string(),
                "cap must not be below the base delay",
            ));
        }

        if self.notifier.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "notifier.max_attempts",
                "0",
                "at least one delivery attempt is required",
            ));
        }

        if self.notifier.max_delay_seconds < self.notifier.base_delay_seconds {
            return Err(ConfigurationError::invalid_value(
                "notifier.max_delay_seconds",
                self.notifier.max_delay_seconds.to_string(),
                "cap must not be below the base delay",
            ));
        }

        if self.estimator.min_samples == 0 || self.estimator.sample_window == 0 {
            return Err(ConfigurationError::invalid_value(
                "estimator.min_samples",
                self.estimator.min_samples.to_string(),
                "sample counts must be greater than 0",
            ));
        }

        if self.estimator.min_samples > self.estimator.sample_window {
            return Err(ConfigurationError::invalid_value(
                "estimator.min_samples",
                self.estimator.min_samples.to_string(),
                "cannot exceed estimator.sample_window",
            ));
        }

        if !(self.estimator.confidence_pct > 0.0 && self.estimator.confidence_pct <= 1.0) {
            return Err(ConfigurationError::invalid_value(
                "estimator.confidence_pct",
                self.estimator.confidence_pct.to_string(),
                "must be within (0, 1]",
            ));
        }

        if self.estimator.confidence_floor_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "estimator.confidence_floor_seconds",
                "0",
                "floor keeps the band non-degenerate and must be greater than 0",
            ));
        }

        if self.feed.success_statuses.is_empty() || self.feed.failure_statuses.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "feed.success_statuses / feed.failure_statuses",
                "feed configuration",
            ));
        }

        Ok(())
    }
}
