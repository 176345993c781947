//! # Notification Delivery Worker
//!
//! Many producers enqueue through cloned [`NotifierHandle`]s; one worker task
//! drains the queue and talks to the transport.
//!
//! ## Delivery Contract
//!
//! - `enqueue` never waits on the transport
//! - failed sends are rescheduled after `base × 2^(attempt-1)` (capped)
//! - after `max_attempts` failures the message moves to the dead-letter set
//! - `message_id` is stable across retries, replays and restarts
//!
//! Scheduling uses Tokio's clock so the whole retry ladder can be driven with
//! paused time in tests.

use chrono::Utc;
use opentelemetry::KeyValue;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use super::dead_letter::{DeadLetterEntry, DeadLetterReason, DeadLetterSet};
use super::spool::Spool;
use super::transport::NotificationTransport;
use crate::config::NotifierConfig;
use crate::error::{Result, ShipyardError};
use crate::logging::{log_error, log_notification_operation};
use crate::metrics;
use crate::models::NotificationMessage;

#[derive(Debug)]
enum Command {
    Deliver(NotificationMessage),
    Replay(NotificationMessage),
    Shutdown(oneshot::Sender<()>),
}

/// Running totals since the notifier started
#[derive(Debug, Default)]
struct NotifierStats {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
    duplicates_skipped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifierStatsSnapshot {
    pub enqueued: u64,
    pub delivered: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub duplicates_skipped: u64,
}

#[derive(Debug)]
struct NotifierShared {
    dead_letters: DeadLetterSet,
    stats: NotifierStats,
    worker: AsyncMutex<Option<JoinHandle<()>>>,
}

/// Cloneable producer side of the notifier
#[derive(Debug, Clone)]
pub struct NotifierHandle {
    sender: mpsc::UnboundedSender<Command>,
    shared: Arc<NotifierShared>,
}

pub struct Notifier;

impl Notifier {
    /// Start the delivery worker. With a spool directory configured, undelivered
    /// messages and dead letters from a previous run are reloaded first.
    pub async fn start(
        config: NotifierConfig,
        transport: Arc<dyn NotificationTransport>,
    ) -> Result<NotifierHandle> {
        let spool = match &config.spool_dir {
            Some(dir) => Some(Spool::open(dir.clone()).await?),
            None => None,
        };

        let (pending, dead_letters) = match &spool {
            Some(spool) => (
                spool.load_pending().await?,
                spool.load_dead_letters().await?,
            ),
            None => (Vec::new(), Vec::new()),
        };

        info!(
            transport = transport.name(),
            max_attempts = config.max_attempts,
            base_delay_seconds = config.base_delay_seconds,
            spooled_pending = pending.len(),
            spooled_dead_letters = dead_letters.len(),
            "Starting notifier"
        );

        let shared = Arc::new(NotifierShared {
            dead_letters: DeadLetterSet::from_entries(dead_letters),
            stats: NotifierStats::default(),
            worker: AsyncMutex::new(None),
        });
        let (sender, receiver) = mpsc::unbounded_channel();

        let mut worker = DeliveryWorker {
            delivered: DeliveredIds::new(config.delivered_id_memory),
            config,
            transport,
            receiver,
            shared: Arc::clone(&shared),
            spool,
            queue: Vec::new(),
        };
        let now = Instant::now();
        for message in pending {
            worker.schedule(message, now);
        }

        let task = tokio::spawn(worker.run());
        *shared.worker.lock().await = Some(task);

        Ok(NotifierHandle { sender, shared })
    }
}

impl NotifierHandle {
    /// Hand a message to the worker and return its id. Never waits on delivery.
    pub fn enqueue(&self, message: NotificationMessage) -> Result<String> {
        let message_id = message.message_id.clone();
        self.sender
            .send(Command::Deliver(message))
            .map_err(|_| ShipyardError::Unavailable("notifier has shut down".to_string()))?;
        self.shared.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(message_id)
    }

    pub fn dead_letters(&self) -> Vec<DeadLetterEntry> {
        self.shared.dead_letters.list()
    }

    pub fn dead_letter(&self, message_id: &str) -> Option<DeadLetterEntry> {
        self.shared.dead_letters.get(message_id)
    }

    /// Move a dead letter back onto the delivery queue with a fresh attempt budget
    pub fn replay_dead_letter(&self, message_id: &str) -> Result<()> {
        let entry = self
            .shared
            .dead_letters
            .take(message_id)
            .ok_or_else(|| ShipyardError::NotFound(format!("dead letter {message_id}")))?;

        let mut message = entry.message.clone();
        message.reset_for_replay();
        if self.sender.send(Command::Replay(message)).is_err() {
            self.shared.dead_letters.insert(entry);
            return Err(ShipyardError::Unavailable(
                "notifier has shut down".to_string(),
            ));
        }

        log_notification_operation(
            "replay",
            entry.message.correlation_id.as_deref(),
            message_id,
            entry.message.kind.as_str(),
            0,
            Some("dead letter requeued by operator"),
        );
        Ok(())
    }

    pub fn stats(&self) -> NotifierStatsSnapshot {
        let stats = &self.shared.stats;
        NotifierStatsSnapshot {
            enqueued: stats.enqueued.load(Ordering::Relaxed),
            delivered: stats.delivered.load(Ordering::Relaxed),
            retried: stats.retried.load(Ordering::Relaxed),
            dead_lettered: stats.dead_lettered.load(Ordering::Relaxed),
            duplicates_skipped: stats.duplicates_skipped.load(Ordering::Relaxed),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Stop accepting messages, let the worker persist its state, and join it.
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.sender.send(Command::Shutdown(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }

        let task = self.shared.worker.lock().await.take();
        if let Some(task) = task {
            task.await.map_err(|e| {
                ShipyardError::Storage(format!("notifier worker ended abnormally: {e}"))
            })?;
        }
        Ok(())
    }
}

/// Bounded memory of delivered message ids
#[derive(Debug)]
struct DeliveredIds {
    order: VecDeque<String>,
    ids: HashSet<String>,
    capacity: usize,
}

impl DeliveredIds {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            ids: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    fn contains(&self, message_id: &str) -> bool {
        self.ids.contains(message_id)
    }

    fn insert(&mut self, message_id: String) {
        if !self.ids.insert(message_id.clone()) {
            return;
        }
        self.order.push_back(message_id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }
}

#[derive(Debug)]
struct Scheduled {
    due: Instant,
    message: NotificationMessage,
}

struct DeliveryWorker {
    config: NotifierConfig,
    transport: Arc<dyn NotificationTransport>,
    receiver: mpsc::UnboundedReceiver<Command>,
    shared: Arc<NotifierShared>,
    spool: Option<Spool>,
    /// Ordered by `due`; equal deadlines keep arrival order
    queue: Vec<Scheduled>,
    delivered: DeliveredIds,
}

impl DeliveryWorker {
    async fn run(mut self) {
        loop {
            let next_due = self.queue.first().map(|scheduled| scheduled.due);
            tokio::select! {
                biased;
                command = self.receiver.recv() => match command {
                    Some(Command::Deliver(message)) => self.accept(message).await,
                    Some(Command::Replay(message)) => {
                        self.accept(message).await;
                        self.persist_dead_letters().await;
                    }
                    Some(Command::Shutdown(ack)) => {
                        self.finish().await;
                        let _ = ack.send(());
                        return;
                    }
                    None => {
                        self.finish().await;
                        return;
                    }
                },
                _ = wait_until(next_due) => self.attempt_next().await,
            }
        }
    }

    fn schedule(&mut self, message: NotificationMessage, due: Instant) {
        let position = self.queue.partition_point(|scheduled| scheduled.due <= due);
        self.queue.insert(position, Scheduled { due, message });
    }

    async fn accept(&mut self, message: NotificationMessage) {
        if self.delivered.contains(&message.message_id) {
            self.skip_duplicate(&message);
            return;
        }
        debug!(
            correlation_id = message.correlation_id.as_deref(),
            message_id = %message.message_id,
            kind = %message.kind,
            queued = self.queue.len(),
            "Notification queued"
        );
        self.schedule(message, Instant::now());
        self.persist_pending().await;
    }

    fn skip_duplicate(&self, message: &NotificationMessage) {
        self.shared
            .stats
            .duplicates_skipped
            .fetch_add(1, Ordering::Relaxed);
        debug!(
            correlation_id = message.correlation_id.as_deref(),
            message_id = %message.message_id,
            "Skipping already delivered notification"
        );
    }

    async fn attempt_next(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        let Scheduled { mut message, .. } = self.queue.remove(0);

        if self.delivered.contains(&message.message_id) {
            self.skip_duplicate(&message);
            self.persist_pending().await;
            return;
        }

        message.attempt_count += 1;
        let attempt = message.attempt_count;
        let kind = message.kind.as_str();

        match self.transport.send(&message).await {
            Ok(()) => {
                self.delivered.insert(message.message_id.clone());
                self.shared.stats.delivered.fetch_add(1, Ordering::Relaxed);
                metrics::notifications_delivered_total().add(1, &[KeyValue::new("kind", kind)]);
                log_notification_operation(
                    "deliver",
                    message.correlation_id.as_deref(),
                    &message.message_id,
                    kind,
                    attempt,
                    Some("delivered"),
                );
            }
            Err(e) => {
                message.last_error = Some(e.to_string());
                if attempt >= self.config.max_attempts {
                    self.dead_letter(message, DeadLetterReason::MaxAttemptsExceeded)
                        .await;
                } else {
                    let delay = self.config.retry_delay(attempt);
                    message.next_attempt_at = Utc::now()
                        + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
                    warn!(
                        correlation_id = message.correlation_id.as_deref(),
                        message_id = %message.message_id,
                        kind = kind,
                        attempt = attempt,
                        retry_in_secs = delay.as_secs(),
                        error = %e,
                        "Notification delivery failed, rescheduling"
                    );
                    self.shared.stats.retried.fetch_add(1, Ordering::Relaxed);
                    metrics::notifications_retried_total().add(1, &[KeyValue::new("kind", kind)]);
                    self.schedule(message, Instant::now() + delay);
                }
            }
        }
        self.persist_pending().await;
    }

    async fn dead_letter(&mut self, message: NotificationMessage, reason: DeadLetterReason) {
        let exhausted = ShipyardError::Exhausted {
            message_id: message.message_id.clone(),
            attempts: message.attempt_count,
        };
        warn!(
            correlation_id = message.correlation_id.as_deref(),
            message_id = %message.message_id,
            kind = %message.kind,
            reason = %reason,
            last_error = message.last_error.as_deref(),
            "{exhausted}; moved to dead letters"
        );
        self.shared
            .stats
            .dead_lettered
            .fetch_add(1, Ordering::Relaxed);
        metrics::notifications_dead_lettered_total().add(
            1,
            &[
                KeyValue::new("kind", message.kind.as_str()),
                KeyValue::new("reason", reason.as_str()),
            ],
        );
        self.shared
            .dead_letters
            .insert(DeadLetterEntry::new(message, reason));
        self.persist_dead_letters().await;
    }

    /// Shutdown path. Messages that raced the shutdown command are still taken in.
    /// With a spool the queue is persisted for the next start; without one each
    /// pending message gets a single final attempt before being dead-lettered.
    async fn finish(&mut self) {
        self.receiver.close();
        while let Ok(command) = self.receiver.try_recv() {
            match command {
                Command::Deliver(message) | Command::Replay(message) => {
                    if !self.delivered.contains(&message.message_id) {
                        self.schedule(message, Instant::now());
                    }
                }
                Command::Shutdown(ack) => {
                    let _ = ack.send(());
                }
            }
        }

        if self.spool.is_some() {
            self.persist_pending().await;
            self.persist_dead_letters().await;
            info!(pending = self.queue.len(), "Notifier stopped, pending messages spooled");
            return;
        }

        let remaining: Vec<_> = self.queue.drain(..).map(|s| s.message).collect();
        let count = remaining.len();
        for mut message in remaining {
            message.attempt_count += 1;
            match self.transport.send(&message).await {
                Ok(()) => {
                    self.delivered.insert(message.message_id.clone());
                    self.shared.stats.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    message.last_error = Some(e.to_string());
                    self.dead_letter(message, DeadLetterReason::ShutdownWithoutSpool)
                        .await;
                }
            }
        }
        info!(flushed = count, "Notifier stopped");
    }

    async fn persist_pending(&self) {
        let Some(spool) = &self.spool else {
            return;
        };
        let pending: Vec<NotificationMessage> = self
            .queue
            .iter()
            .map(|scheduled| scheduled.message.clone())
            .collect();
        if let Err(e) = spool.save_pending(&pending).await {
            log_error("notifier", "persist_pending", &e.to_string(), None);
        }
    }

    async fn persist_dead_letters(&self) {
        let Some(spool) = &self.spool else {
            return;
        };
        if let Err(e) = spool
            .save_dead_letters(&self.shared.dead_letters.list())
            .await
        {
            log_error("notifier", "persist_dead_letters", &e.to_string(), None);
        }
    }
}

async fn wait_until(due: Option<Instant>) {
    match due {
        Some(due) => sleep_until(due).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivered_ids_are_bounded() {
        let mut ids = DeliveredIds::new(2);
        ids.insert("a".to_string());
        ids.insert("b".to_string());
        ids.insert("c".to_string());
        assert!(!ids.contains("a"));
        assert!(ids.contains("b"));
        assert!(ids.contains("c"));
    }

    #[test]
    fn test_delivered_ids_ignore_repeats() {
        let mut ids = DeliveredIds::new(2);
        ids.insert("a".to_string());
        ids.insert("a".to_string());
        ids.insert("b".to_string());
        assert!(ids.contains("a"));
        assert_eq!(ids.order.len(), 2);
    }
}
