//! # Historical Store
//!
//! Append-only window of finished deployment timings per target. Appends evict the
//! oldest sample once the window is full. When opened on a directory each target
//! is persisted as one JSON document, rewritten atomically on every append.

use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Result, ShipyardError};
use crate::models::deployment_record::validate_name;
use crate::models::HistoricalSample;
use crate::utils::fs::{read_json_sync, sanitize_file_stem, write_json_atomic_sync};

#[derive(Debug)]
pub struct HistoricalStore {
    samples: RwLock<HashMap<String, VecDeque<HistoricalSample>>>,
    capacity: usize,
    directory: Option<PathBuf>,
}

impl HistoricalStore {
    pub fn in_memory(capacity: usize) -> Self {
        Self {
            samples: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            directory: None,
        }
    }

    /// Open (or create) a durable store and load every persisted target
    pub fn open(directory: impl Into<PathBuf>, capacity: usize) -> Result<Self> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory).map_err(|e| {
            ShipyardError::Unavailable(format!(
                "history directory {} is not usable: {e}",
                directory.display()
            ))
        })?;

        let capacity = capacity.max(1);
        let mut loaded = HashMap::new();
        let entries = std::fs::read_dir(&directory)
            .map_err(|e| ShipyardError::Storage(format!("reading history directory: {e}")))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match read_json_sync::<Vec<HistoricalSample>>(&path) {
                Ok(Some(samples)) => {
                    let Some(first) = samples.first() else {
                        continue;
                    };
                    let target = first.target_name.clone();
                    let mut window: VecDeque<HistoricalSample> = samples.into();
                    while window.len() > capacity {
                        window.pop_front();
                    }
                    loaded.insert(target, window);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "Skipping unreadable history file");
                }
            }
        }

        debug!(
            directory = %directory.display(),
            targets = loaded.len(),
            "Historical store opened"
        );

        Ok(Self {
            samples: RwLock::new(loaded),
            capacity,
            directory: Some(directory),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a sample, evicting the oldest for its target when over capacity
    pub fn append(&self, sample: HistoricalSample) -> Result<()> {
        validate_name("target_name", &sample.target_name)?;

        let mut samples = self.samples.write();
        let window = samples.entry(sample.target_name.clone()).or_default();
        let target = sample.target_name.clone();
        window.push_back(sample);
        while window.len() > self.capacity {
            window.pop_front();
        }

        if let Some(directory) = &self.directory {
            let snapshot: Vec<&HistoricalSample> = window.iter().collect();
            write_json_atomic_sync(&Self::target_path(directory, &target), &snapshot)
                .map_err(|e| ShipyardError::Storage(format!("persisting history: {e}")))?;
        }

        Ok(())
    }

    /// Oldest first
    pub fn samples(&self, target_name: &str) -> Vec<HistoricalSample> {
        self.samples
            .read()
            .get(target_name)
            .map(|window| window.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn sample_count(&self, target_name: &str) -> usize {
        self.samples
            .read()
            .get(target_name)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Total durations of the newest `limit` samples
    pub fn recent_durations(&self, target_name: &str, limit: usize) -> Vec<Duration> {
        self.samples
            .read()
            .get(target_name)
            .map(|window| {
                window
                    .iter()
                    .rev()
                    .take(limit)
                    .map(|sample| sample.total_duration)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn target_path(directory: &Path, target_name: &str) -> PathBuf {
        directory.join(format!("{}.json", sanitize_file_stem(target_name)))
    }
}
