//! Completed-vs-total progress, safe to update from any task.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Render every this many completions (and on the last one)
pub const PROGRESS_INTERVAL: usize = 50;

#[derive(Debug, Clone)]
pub struct ProgressReporter {
    total: usize,
    visible: bool,
    completed: Arc<AtomicUsize>,
    rendered: Arc<AtomicBool>,
}

impl ProgressReporter {
    pub fn new(total: usize, visible: bool) -> Self {
        Self {
            total,
            visible,
            completed: Arc::new(AtomicUsize::new(0)),
            rendered: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Tracks counts without rendering
    pub fn hidden(total: usize) -> Self {
        Self::new(total, false)
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Record the aggregator's completed count and render when due
    pub fn update(&self, completed: usize) {
        self.completed.fetch_max(completed, Ordering::SeqCst);
        if !self.visible {
            return;
        }
        if let Some(line) = progress_line(completed, self.total) {
            let mut stderr = std::io::stderr().lock();
            let _ = write!(stderr, "\r{line}");
            let _ = stderr.flush();
            self.rendered.store(true, Ordering::SeqCst);
        }
    }

    /// End the progress line so later output starts on a fresh one
    pub fn finish(&self) {
        if self.rendered.swap(false, Ordering::SeqCst) {
            let _ = writeln!(std::io::stderr());
        }
    }
}

/// The line to show for `completed`, if this completion is a render point
pub fn progress_line(completed: usize, total: usize) -> Option<String> {
    let due = completed > 0 && (completed % PROGRESS_INTERVAL == 0 || completed == total);
    due.then(|| format!("Progress: {completed}/{total} checked..."))
}
