//! Scripted orchestrator feed

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use crate::monitoring::{ExternalStatus, FeedError, FeedQuery, StatusFeed};

#[derive(Debug, Clone)]
pub enum FeedStep {
    Status(ExternalStatus),
    Error(FeedError),
}

#[derive(Debug, Default)]
struct ScriptState {
    script: VecDeque<FeedStep>,
    fallback: Option<ExternalStatus>,
    unavailable: bool,
    panic_on_polls: HashSet<u64>,
    always_panic: bool,
    queries: Vec<FeedQuery>,
}

/// Feed that answers from a script, then from a fallback status.
///
/// Poll numbers are 1-based and count every call, including ones that panic.
#[derive(Debug, Default)]
pub struct ScriptedStatusFeed {
    state: Mutex<ScriptState>,
    polls: AtomicU64,
}

impl ScriptedStatusFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_status(&self, status: ExternalStatus) -> &Self {
        self.state.lock().script.push_back(FeedStep::Status(status));
        self
    }

    pub fn push_error(&self, error: FeedError) -> &Self {
        self.state.lock().script.push_back(FeedStep::Error(error));
        self
    }

    /// Answer once the script runs out
    pub fn set_fallback(&self, status: ExternalStatus) {
        self.state.lock().fallback = Some(status);
    }

    /// Fallback status with no event timestamp
    pub fn set_default_status(&self, status: &str) {
        self.set_fallback(ExternalStatus::new(status, None));
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    pub fn panic_on_poll(&self, poll: u64) {
        self.state.lock().panic_on_polls.insert(poll);
    }

    pub fn always_panic(&self) {
        self.state.lock().always_panic = true;
    }

    pub fn polls(&self) -> u64 {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<FeedQuery> {
        self.state.lock().queries.clone()
    }
}

#[async_trait]
impl StatusFeed for ScriptedStatusFeed {
    async fn fetch_status(&self, query: &FeedQuery) -> Result<ExternalStatus, FeedError> {
        let poll = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        let step = {
            let mut state = self.state.lock();
            state.queries.push(query.clone());
            if state.always_panic || state.panic_on_polls.contains(&poll) {
                None
            } else if state.unavailable {
                Some(FeedStep::Error(FeedError::Transient(
                    "orchestrator unreachable".to_string(),
                )))
            } else {
                Some(match state.script.pop_front() {
                    Some(step) => step,
                    None => match &state.fallback {
                        Some(status) => FeedStep::Status(status.clone()),
                        None => FeedStep::Error(FeedError::NotFound(query.target_name.clone())),
                    },
                })
            }
        };

        match step {
            None => panic!("scripted feed crash on poll {poll}"),
            Some(FeedStep::Status(status)) => Ok(status),
            Some(FeedStep::Error(error)) => Err(error),
        }
    }
}

/// Non-terminal status whose latest external event happened at `last_event_at`
pub fn in_progress(last_event_at: DateTime<Utc>) -> ExternalStatus {
    ExternalStatus::new("UPDATE_IN_PROGRESS", Some(last_event_at))
}

/// A distinct event timestamp per step, `step` seconds after an origin taken once
/// per process, so scripted events look recent to the stall clock
pub fn event_at(step: i64) -> DateTime<Utc> {
    static ORIGIN: OnceLock<DateTime<Utc>> = OnceLock::new();
    *ORIGIN.get_or_init(Utc::now) + chrono::Duration::seconds(step)
}
