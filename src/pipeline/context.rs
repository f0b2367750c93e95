use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::error::RunError;
use crate::evaluation::Criteria;
use crate::scanner::SearchQuery;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Init,
    Fetching,
    Processing,
    Done,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Init => "INIT",
            RunState::Fetching => "FETCHING",
            RunState::Processing => "PROCESSING",
            RunState::Done => "DONE",
            RunState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    /// Reached DONE, but some listings or pages failed, or the run timed out.
    PartialFailure,
    FatalFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Processed,
    Matched,
    Notified,
    Duplicate,
    Errored,
    FetchError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub processed: u64,
    pub matched: u64,
    pub notified: u64,
    pub duplicates: u64,
    pub errored: u64,
    pub fetch_errors: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub outcome: RunOutcome,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub counters: RunCounters,
    pub pages_fetched: u32,
    pub timed_out: bool,
    pub error: Option<String>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Success
    }

    /// FAILED report for a run that never got a criteria snapshot, e.g. when
    /// the configuration itself does not load.
    pub fn failed_before_start(error: &RunError) -> Self {
        let now = Utc::now();
        let run_id = Uuid::new_v4();
        tracing::error!(%run_id, error = %error, "❌ Run failed during INIT");
        Self {
            run_id,
            outcome: RunOutcome::FatalFailure,
            state: RunState::Failed,
            started_at: now,
            finished_at: now,
            counters: RunCounters::default(),
            pages_fetched: 0,
            timed_out: false,
            error: Some(error.to_string()),
        }
    }
}

/// Per-run state. Never persisted.
///
/// Counters are atomics so concurrent listing workers can share `&RunContext`;
/// the state field is only moved by the orchestrator.
pub struct RunContext {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub criteria: Arc<Criteria>,
    pub query: SearchQuery,
    state: RunState,
    pages_fetched: u32,
    timed_out: bool,
    processed: AtomicU64,
    matched: AtomicU64,
    notified: AtomicU64,
    duplicates: AtomicU64,
    errored: AtomicU64,
    fetch_errors: AtomicU64,
}

impl RunContext {
    pub fn new(query: SearchQuery, criteria: Arc<Criteria>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            criteria,
            query,
            state: RunState::Init,
            pages_fetched: 0,
            timed_out: false,
            processed: AtomicU64::new(0),
            matched: AtomicU64::new(0),
            notified: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            errored: AtomicU64::new(0),
            fetch_errors: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Moves to `to`. Terminal states are final.
    pub fn transition(&mut self, to: RunState) {
        if self.state == to || self.state.is_terminal() {
            return;
        }
        tracing::info!(from = %self.state, to = %to, "🔄 Run state transition");
        self.state = to;
    }

    pub fn record(&self, counter: Counter) {
        self.cell(counter).fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self, counter: Counter) -> u64 {
        self.cell(counter).load(Ordering::Relaxed)
    }

    fn cell(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::Processed => &self.processed,
            Counter::Matched => &self.matched,
            Counter::Notified => &self.notified,
            Counter::Duplicate => &self.duplicates,
            Counter::Errored => &self.errored,
            Counter::FetchError => &self.fetch_errors,
        }
    }

    pub fn page_fetched(&mut self) {
        self.pages_fetched += 1;
    }

    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    pub fn mark_timed_out(&mut self) {
        self.timed_out = true;
    }

    pub fn counters(&self) -> RunCounters {
        RunCounters {
            processed: self.count(Counter::Processed),
            matched: self.count(Counter::Matched),
            notified: self.count(Counter::Notified),
            duplicates: self.count(Counter::Duplicate),
            errored: self.count(Counter::Errored),
            fetch_errors: self.count(Counter::FetchError),
        }
    }

    /// Completes the run in DONE.
    pub fn finish(mut self) -> RunReport {
        self.transition(RunState::Done);
        let counters = self.counters();
        let outcome = if self.timed_out || counters.errored > 0 || counters.fetch_errors > 0 {
            RunOutcome::PartialFailure
        } else {
            RunOutcome::Success
        };
        self.report(outcome, None)
    }

    /// Completes the run in FAILED.
    pub fn fail(mut self, error: &RunError) -> RunReport {
        tracing::error!(error = %error, "❌ Run failed");
        self.transition(RunState::Failed);
        self.report(RunOutcome::FatalFailure, Some(error.to_string()))
    }

    fn report(&self, outcome: RunOutcome, error: Option<String>) -> RunReport {
        RunReport {
            run_id: self.run_id,
            outcome,
            state: self.state,
            started_at: self.started_at,
            finished_at: Utc::now(),
            counters: self.counters(),
            pages_fetched: self.pages_fetched,
            timed_out: self.timed_out,
            error,
        }
    }
}
