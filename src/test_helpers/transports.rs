//! Recording and failing notification transports

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::time::Instant;

use crate::constants::NotificationKind;
use crate::models::NotificationMessage;
use crate::notification::{NotificationTransport, TransportError};

/// Accepts everything and keeps a copy
#[derive(Debug, Default)]
pub struct RecordingTransport {
    delivered: Mutex<Vec<NotificationMessage>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<NotificationMessage> {
        self.delivered.lock().clone()
    }

    pub fn count_kind(&self, kind: NotificationKind) -> usize {
        self.delivered
            .lock()
            .iter()
            .filter(|message| message.kind == kind)
            .count()
    }
}

#[async_trait]
impl NotificationTransport for RecordingTransport {
    async fn send(&self, message: &NotificationMessage) -> Result<(), TransportError> {
        self.delivered.lock().push(message.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Fails the first `failures` sends, then succeeds. Attempt instants use Tokio's
/// clock so paused-time tests can assert on the retry ladder.
#[derive(Debug)]
pub struct FlakyTransport {
    failures: u32,
    attempts: AtomicU32,
    attempt_times: Mutex<Vec<Instant>>,
    delivered: Mutex<Vec<NotificationMessage>>,
}

impl FlakyTransport {
    pub fn new(failures: u32) -> Self {
        Self {
            failures,
            attempts: AtomicU32::new(0),
            attempt_times: Mutex::new(Vec::new()),
            delivered: Mutex::new(Vec::new()),
        }
    }

    pub fn always_failing() -> Self {
        Self::new(u32::MAX)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempt_times.lock().clone()
    }

    pub fn delivered(&self) -> Vec<NotificationMessage> {
        self.delivered.lock().clone()
    }
}

#[async_trait]
impl NotificationTransport for FlakyTransport {
    async fn send(&self, message: &NotificationMessage) -> Result<(), TransportError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        self.attempt_times.lock().push(Instant::now());
        if attempt <= self.failures {
            return Err(TransportError::Unavailable(format!(
                "simulated outage on attempt {attempt}"
            )));
        }
        self.delivered.lock().push(message.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "flaky"
    }
}
