//! # Completion Estimator
//!
//! Remaining-time estimates from the rolling mean of a target's recent
//! deployments. Below the minimum sample count the answer is
//! [`Estimate::Unknown`], never a number.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::historical_store::HistoricalStore;
use crate::config::EstimatorConfig;
use crate::error::Result;
use crate::models::HistoricalSample;
use crate::utils::format_duration;

/// Numeric estimate with its confidence band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstimateWindow {
    pub remaining: Duration,
    pub confidence_low: Duration,
    pub confidence_high: Duration,
    /// Rolling mean the estimate is based on
    pub average: Duration,
    /// How far `elapsed` already exceeds the average
    pub overrun: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Estimate {
    /// Not enough history for a meaningful number
    Unknown { available: usize, required: usize },
    Known(EstimateWindow),
}

impl Estimate {
    pub fn is_known(&self) -> bool {
        matches!(self, Self::Known(_))
    }

    pub fn remaining(&self) -> Option<Duration> {
        match self {
            Self::Known(window) => Some(window.remaining),
            Self::Unknown { .. } => None,
        }
    }

    /// Operator-facing rendering
    pub fn render(&self) -> String {
        match self {
            Self::Unknown { .. } => "insufficient data".to_string(),
            Self::Known(window) if window.overrun > Duration::ZERO => format!(
                "overdue by {} (up to {} more)",
                format_duration(window.overrun),
                format_duration(window.confidence_high)
            ),
            Self::Known(window) => format!(
                "~{} ({}-{})",
                format_duration(window.remaining),
                format_duration(window.confidence_low),
                format_duration(window.confidence_high)
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Estimator {
    store: Arc<HistoricalStore>,
    config: EstimatorConfig,
}

impl Estimator {
    pub fn new(store: Arc<HistoricalStore>, config: EstimatorConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<HistoricalStore> {
        &self.store
    }

    /// Rolling mean of the newest `sample_window` durations, or `None` below the minimum
    pub fn historical_average(&self, target_name: &str) -> Option<Duration> {
        let durations = self
            .store
            .recent_durations(target_name, self.config.sample_window);
        if durations.len() < self.config.min_samples || durations.is_empty() {
            return None;
        }
        let total: Duration = durations.iter().sum();
        Some(total / durations.len() as u32)
    }

    pub fn estimate(&self, target_name: &str, elapsed: Duration) -> Estimate {
        let Some(average) = self.historical_average(target_name) else {
            let available = self
                .store
                .sample_count(target_name)
                .min(self.config.sample_window);
            return Estimate::Unknown {
                available,
                required: self.config.min_samples,
            };
        };

        let remaining = average.saturating_sub(elapsed);
        let overrun = elapsed.saturating_sub(average);
        let floor = self.config.confidence_floor();
        let pct = self.config.confidence_pct;

        let half_width = if overrun.is_zero() {
            remaining.mul_f64(pct).max(floor)
        } else {
            (average.mul_f64(pct) + overrun).max(floor)
        };

        let window = EstimateWindow {
            remaining,
            confidence_low: remaining.saturating_sub(half_width),
            confidence_high: remaining + half_width,
            average,
            overrun,
        };

        debug!(
            target_name = %target_name,
            elapsed_secs = elapsed.as_secs(),
            average_secs = average.as_secs(),
            remaining_secs = remaining.as_secs(),
            "Computed deployment estimate"
        );

        Estimate::Known(window)
    }

    /// Append a finished deployment's timing
    pub fn record_outcome(&self, sample: HistoricalSample) -> Result<()> {
        self.store.append(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn estimator_with(durations: &[u64]) -> Estimator {
        let store = Arc::new(HistoricalStore::in_memory(20));
        for secs in durations {
            store
                .append(HistoricalSample::completed(
                    "api",
                    Duration::from_secs(*secs),
                ))
                .unwrap();
        }
        Estimator::new(store, EstimatorConfig::default())
    }

    #[test]
    fn test_unknown_below_minimum_samples() {
        let estimator = estimator_with(&[600, 600]);
        let estimate = estimator.estimate("api", Duration::from_secs(60));
        assert_eq!(
            estimate,
            Estimate::Unknown {
                available: 2,
                required: 3
            }
        );
        assert_eq!(estimate.render(), "insufficient data");
        assert!(estimate.remaining().is_none());
    }

    #[test]
    fn test_known_once_minimum_is_met() {
        let estimator = estimator_with(&[500, 600, 700]);
        let Estimate::Known(window) = estimator.estimate("api", Duration::from_secs(100)) else {
            panic!("expected a numeric estimate");
        };
        assert_eq!(window.average, Duration::from_secs(600));
        assert_eq!(window.remaining, Duration::from_secs(500));
        // 20% of 500s
        assert_eq!(window.confidence_low, Duration::from_secs(400));
        assert_eq!(window.confidence_high, Duration::from_secs(600));
    }

    #[test]
    fn test_band_never_narrower_than_floor() {
        let estimator = estimator_with(&[600, 600, 600]);
        let Estimate::Known(window) = estimator.estimate("api", Duration::from_secs(590)) else {
            panic!("expected a numeric estimate");
        };
        assert_eq!(window.remaining, Duration::from_secs(10));
        assert_eq!(window.confidence_high, Duration::from_secs(40));
        assert_eq!(window.confidence_low, Duration::ZERO);
    }

    #[test]
    fn test_band_widens_with_overrun() {
        let estimator = estimator_with(&[600, 600, 600]);
        let Estimate::Known(early) = estimator.estimate("api", Duration::from_secs(660)) else {
            panic!("expected a numeric estimate");
        };
        let Estimate::Known(late) = estimator.estimate("api", Duration::from_secs(900)) else {
            panic!("expected a numeric estimate");
        };
        assert_eq!(early.remaining, Duration::ZERO);
        assert!(late.confidence_high > early.confidence_high);
        assert!(Estimate::Known(late).render().starts_with("overdue by"));
    }

    #[test]
    fn test_window_limits_average() {
        let store = Arc::new(HistoricalStore::in_memory(20));
        for secs in [10_000, 100, 100, 100] {
            store
                .append(HistoricalSample::completed("api", Duration::from_secs(secs)))
                .unwrap();
        }
        let config = EstimatorConfig {
            sample_window: 3,
            ..EstimatorConfig::default()
        };
        let estimator = Estimator::new(store, config);
        assert_eq!(
            estimator.historical_average("api"),
            Some(Duration::from_secs(100))
        );
    }

    proptest! {
        #[test]
        fn prop_known_estimates_have_non_degenerate_bands(
            durations in proptest::collection::vec(1u64..20_000, 3..20),
            elapsed in 0u64..40_000,
        ) {
            let estimator = estimator_with(&durations);
            match estimator.estimate("api", Duration::from_secs(elapsed)) {
                Estimate::Known(window) => {
                    prop_assert!(window.confidence_high > window.confidence_low);
                    prop_assert!(window.confidence_low <= window.remaining);
                    prop_assert!(window.remaining <= window.confidence_high);
                }
                Estimate::Unknown { .. } => prop_assert!(false, "minimum was met"),
            }
        }
    }
}
