//! Outcome model and the bounded validation engine.
//!
//! The engine owns one scan's worth of jobs:
//! - **Bounded concurrency**: a semaphore permit is taken before a job is
//!   spawned, so at most `workers` external processes run at once and queued
//!   targets are never started once cancellation has been requested
//! - **Single result channel**: jobs send outcomes over one `mpsc` channel
//!   drained by one aggregator task that updates counts and progress
//! - **Joined shutdown**: every job lives in a `JoinSet` and is joined before
//!   the session is returned

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::adapter::{JobResult, ValidatorAdapter};
use crate::cancel::CancellationController;
use crate::error::{Result, ScanError};
use crate::file_discovery::Target;
use crate::metadata::{TechnicalMetadata, read_metadata_blocking};
use crate::progress::ProgressReporter;
use crate::session::{ResultAggregator, ScanSession, SessionState};

/// Method recorded when no tool could run at all
pub const METHOD_NONE: &str = "none";
/// Method recorded when the adapter itself failed
pub const METHOD_EXCEPTION: &str = "exception";

/// Verdict for one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Ok,
    /// Passed, but the tool still printed diagnostics
    Warn,
    Fail,
    /// The tool could not be run or waited on
    Exception,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Ok => "ok",
            ValidationStatus::Warn => "warn",
            ValidationStatus::Fail => "fail",
            ValidationStatus::Exception => "exception",
        }
    }

    /// Counts toward a passing exit status
    pub fn is_passing(&self) -> bool {
        matches!(self, ValidationStatus::Ok | ValidationStatus::Warn)
    }

    /// Listed in a failure-only report
    pub fn is_reportable(&self) -> bool {
        !matches!(self, ValidationStatus::Ok)
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recorded result of validating one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub path: PathBuf,
    pub status: ValidationStatus,
    /// Tool name, or [`METHOD_NONE`] / [`METHOD_EXCEPTION`]
    pub method: String,
    /// Empty on `ok`
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TechnicalMetadata>,
}

impl ValidationOutcome {
    fn new(
        path: impl AsRef<Path>,
        status: ValidationStatus,
        method: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            status,
            method: method.into(),
            message: message.into(),
            metadata: None,
        }
    }

    pub fn ok(path: impl AsRef<Path>, method: impl Into<String>) -> Self {
        Self::new(path, ValidationStatus::Ok, method, String::new())
    }

    pub fn warn(path: impl AsRef<Path>, method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(path, ValidationStatus::Warn, method, message)
    }

    pub fn fail(path: impl AsRef<Path>, method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(path, ValidationStatus::Fail, method, message)
    }

    pub fn exception(
        path: impl AsRef<Path>,
        method: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(path, ValidationStatus::Exception, method, message)
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum number of concurrently running validations
    pub workers: usize,
    /// Attach header metadata to every outcome (all-rows reports)
    pub collect_metadata: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            collect_metadata: false,
        }
    }
}

/// Scheduler for one scan session
pub struct ValidationEngine {
    adapter: Arc<ValidatorAdapter>,
    config: EngineConfig,
}

impl ValidationEngine {
    pub fn new(adapter: ValidatorAdapter, config: EngineConfig) -> Self {
        Self {
            adapter: Arc::new(adapter),
            config,
        }
    }

    /// Validate every target and return the terminal session.
    ///
    /// Returns only after every spawned job and the aggregator have finished.
    pub async fn run(
        &self,
        targets: Vec<Target>,
        controller: &CancellationController,
        progress: &ProgressReporter,
    ) -> Result<ScanSession> {
        let total = targets.len();
        let token = controller.token();
        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let aggregator = Arc::new(ResultAggregator::new());
        let interrupted = Arc::new(AtomicUsize::new(0));

        info!(
            targets = total,
            workers = self.config.workers,
            chain = ?self.adapter.chain().iter().map(|t| t.name()).collect::<Vec<_>>(),
            "starting scan"
        );

        let (sender, mut receiver) = mpsc::unbounded_channel::<ValidationOutcome>();
        let aggregator_task = {
            let aggregator = Arc::clone(&aggregator);
            let progress = progress.clone();
            tokio::spawn(async move {
                while let Some(outcome) = receiver.recv().await {
                    debug!(
                        path = %outcome.path.display(),
                        status = %outcome.status,
                        method = %outcome.method,
                        "outcome"
                    );
                    let completed = aggregator.record(outcome);
                    progress.update(completed);
                }
            })
        };

        let mut jobs = JoinSet::new();
        for target in targets {
            // Pre-dispatch checkpoint: wait for capacity unless cancelled first
            let permit = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    permit.map_err(|e| ScanError::Concurrency {
                        details: format!("validation semaphore closed: {e}"),
                    })?
                }
            };

            let adapter = Arc::clone(&self.adapter);
            let sender = sender.clone();
            let token = token.clone();
            let interrupted = Arc::clone(&interrupted);
            let collect_metadata = self.config.collect_metadata;

            jobs.spawn(async move {
                let _permit = permit;
                let path = target.path().to_path_buf();

                let result = AssertUnwindSafe(adapter.validate(&target, &token))
                    .catch_unwind()
                    .await;

                let mut outcome = match result {
                    Ok(JobResult::Finished(outcome)) => outcome,
                    Ok(JobResult::Interrupted) => {
                        interrupted.fetch_add(1, Ordering::SeqCst);
                        return;
                    }
                    Err(panic) => {
                        let cause = panic_message(panic.as_ref());
                        error!(path = %path.display(), cause = %cause, "validation job panicked");
                        ValidationOutcome::exception(&path, METHOD_EXCEPTION, cause)
                    }
                };

                if collect_metadata {
                    outcome.metadata = Some(read_metadata_blocking(path).await);
                }

                // The receiver outlives every job
                let _ = sender.send(outcome);
            });
        }
        drop(sender);

        while let Some(joined) = jobs.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "validation task failed to join");
            }
        }
        aggregator_task.await.map_err(|e| ScanError::Concurrency {
            details: format!("aggregator task join error: {e}"),
        })?;

        let state = if token.is_cancelled() {
            info!("scan cancelled");
            SessionState::Cancelled
        } else {
            SessionState::Completed
        };

        Ok(ScanSession::from_aggregator(
            total,
            &aggregator,
            state,
            interrupted.load(Ordering::SeqCst),
        ))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("validator panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("validator panicked: {message}")
    } else {
        "validator panicked".to_string()
    }
}
