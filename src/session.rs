//! Result aggregation and the terminal scan session.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::validator::{ValidationOutcome, ValidationStatus};

/// Running totals per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub ok: usize,
    pub warn: usize,
    pub fail: usize,
    pub exception: usize,
}

impl StatusCounts {
    pub fn add(&mut self, status: ValidationStatus) {
        match status {
            ValidationStatus::Ok => self.ok += 1,
            ValidationStatus::Warn => self.warn += 1,
            ValidationStatus::Fail => self.fail += 1,
            ValidationStatus::Exception => self.exception += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.ok + self.warn + self.fail + self.exception
    }

    /// Outcomes that make the scan fail
    pub fn failing(&self) -> usize {
        self.fail + self.exception
    }
}

#[derive(Debug, Default)]
struct AggregatorState {
    outcomes: Vec<ValidationOutcome>,
    counts: StatusCounts,
}

/// Append-only outcome collection. Outcomes and counts change together under
/// one lock, so `completed() == snapshot().len()` at every observation.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    state: Mutex<AggregatorState>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, AggregatorState> {
        // Only appends happen under the lock; a poisoned guard is still consistent
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an outcome, returning the new completed count
    pub fn record(&self, outcome: ValidationOutcome) -> usize {
        let mut state = self.lock();
        state.counts.add(outcome.status);
        state.outcomes.push(outcome);
        state.outcomes.len()
    }

    pub fn completed(&self) -> usize {
        self.lock().outcomes.len()
    }

    pub fn counts(&self) -> StatusCounts {
        self.lock().counts
    }

    pub fn snapshot(&self) -> Vec<ValidationOutcome> {
        self.lock().outcomes.clone()
    }
}

/// Terminal state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Completed,
    Cancelled,
}

/// Process exit status of a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanExit {
    Passed = 0,
    Failed = 1,
    EnvironmentError = 2,
    Cancelled = 130,
}

impl ScanExit {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// One finished scan. Immutable once returned by the engine.
#[derive(Debug, Clone, Serialize)]
pub struct ScanSession {
    pub total_discovered: usize,
    pub outcomes: Vec<ValidationOutcome>,
    pub counts: StatusCounts,
    pub state: SessionState,
    /// Jobs stopped mid-run by cancellation; they have no outcome
    pub interrupted: usize,
}

impl ScanSession {
    pub fn from_aggregator(
        total_discovered: usize,
        aggregator: &ResultAggregator,
        state: SessionState,
        interrupted: usize,
    ) -> Self {
        let guard = aggregator.lock();
        Self {
            total_discovered,
            outcomes: guard.outcomes.clone(),
            counts: guard.counts,
            state,
            interrupted,
        }
    }

    pub fn completed(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state == SessionState::Cancelled
    }

    /// Non-ok outcomes in completion order
    pub fn failures(&self) -> impl Iterator<Item = &ValidationOutcome> {
        self.outcomes.iter().filter(|o| o.status.is_reportable())
    }

    pub fn sorted_outcomes(&self) -> Vec<&ValidationOutcome> {
        let mut sorted: Vec<&ValidationOutcome> = self.outcomes.iter().collect();
        sorted.sort_by(|a, b| a.path.cmp(&b.path));
        sorted
    }

    pub fn exit(&self) -> ScanExit {
        if self.is_cancelled() {
            ScanExit::Cancelled
        } else if self.counts.failing() > 0 {
            ScanExit::Failed
        } else {
            ScanExit::Passed
        }
    }
}
