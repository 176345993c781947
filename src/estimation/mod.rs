//! # Estimation
//!
//! Historical timings and the remaining-time estimates derived from them.

pub mod estimator;
pub mod historical_store;

pub use estimator::{Estimate, EstimateWindow, Estimator};
pub use historical_store::HistoricalStore;
