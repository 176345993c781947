//! On-disk spool for the notifier: undelivered messages and dead letters.
//!
//! Both files are rewritten whole on every change via atomic rename. The
//! notifier worker is the only writer.

use std::path::{Path, PathBuf};

use super::dead_letter::DeadLetterEntry;
use crate::constants::system;
use crate::error::{Result, ShipyardError};
use crate::models::NotificationMessage;
use crate::utils::fs::{read_json, write_json_atomic};

#[derive(Debug, Clone)]
pub struct Spool {
    directory: PathBuf,
}

impl Spool {
    pub async fn open(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        tokio::fs::create_dir_all(&directory).await.map_err(|e| {
            ShipyardError::Unavailable(format!(
                "notification spool {} is not usable: {e}",
                directory.display()
            ))
        })?;
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn pending_path(&self) -> PathBuf {
        self.directory.join(system::SPOOL_PENDING_FILE)
    }

    fn dead_letter_path(&self) -> PathBuf {
        self.directory.join(system::SPOOL_DEAD_LETTER_FILE)
    }

    pub async fn load_pending(&self) -> Result<Vec<NotificationMessage>> {
        read_json(&self.pending_path())
            .await
            .map(Option::unwrap_or_default)
            .map_err(|e| ShipyardError::Storage(format!("reading pending spool: {e}")))
    }

    pub async fn save_pending(&self, messages: &[NotificationMessage]) -> Result<()> {
        write_json_atomic(&self.pending_path(), &messages)
            .await
            .map_err(|e| ShipyardError::Storage(format!("writing pending spool: {e}")))
    }

    pub async fn load_dead_letters(&self) -> Result<Vec<DeadLetterEntry>> {
        read_json(&self.dead_letter_path())
            .await
            .map(Option::unwrap_or_default)
            .map_err(|e| ShipyardError::Storage(format!("reading dead-letter spool: {e}")))
    }

    pub async fn save_dead_letters(&self, entries: &[DeadLetterEntry]) -> Result<()> {
        write_json_atomic(&self.dead_letter_path(), &entries)
            .await
            .map_err(|e| ShipyardError::Storage(format!("writing dead-letter spool: {e}")))
    }
}
