//! End-of-run summary formatting.

use serde::Serialize;

use crate::cli::{OutputFormat, VerbosityLevel};
use crate::scan::{ScanOutcome, ScanReport};
use crate::session::{ScanSession, SessionState};
use crate::validator::{ValidationOutcome, ValidationStatus};

/// Failures listed in a normal-verbosity summary
pub const FAILURE_SAMPLE_SIZE: usize = 5;
/// Longest message shown in the failure sample
pub const MESSAGE_PREVIEW_CHARS: usize = 160;

/// Output formatter for the scan summary
pub struct Output {
    verbosity: VerbosityLevel,
    format: OutputFormat,
    show_colors: bool,
}

impl Output {
    pub fn new(verbosity: VerbosityLevel, format: OutputFormat) -> Self {
        Self {
            verbosity,
            format,
            show_colors: atty::is(atty::Stream::Stdout),
        }
    }

    pub fn without_colors(mut self) -> Self {
        self.show_colors = false;
        self
    }

    fn colorize(&self, text: &str, color: &str) -> String {
        if self.show_colors {
            format!("\x1b[{}m{}\x1b[0m", color, text)
        } else {
            text.to_string()
        }
    }

    /// Print the summary: JSON and results to stdout, environment errors to stderr
    pub fn emit(&self, report: &ScanReport) {
        let rendered = self.format_report(report);
        if rendered.is_empty() {
            return;
        }
        let to_stderr = self.format == OutputFormat::Human
            && matches!(report.outcome, ScanOutcome::EnvironmentError { .. });
        if to_stderr {
            eprint!("{rendered}");
        } else {
            print!("{rendered}");
        }
    }

    pub fn format_report(&self, report: &ScanReport) -> String {
        match self.format {
            OutputFormat::Json => format_json(report),
            OutputFormat::Human => self.format_human(report),
        }
    }

    fn format_human(&self, report: &ScanReport) -> String {
        let label = report.profile.to_uppercase();
        match &report.outcome {
            ScanOutcome::NoTargets => {
                if self.verbosity == VerbosityLevel::Quiet {
                    return String::new();
                }
                format!("No {} files found under: {}\n", label, report.root.display())
            }
            ScanOutcome::EnvironmentError { message, .. } => {
                format!("{} {}\n", self.colorize("Error:", "31"), message)
            }
            ScanOutcome::Finished { session, report: path } => {
                self.format_session(&label, report, session, path.as_deref())
            }
        }
    }

    fn format_session(
        &self,
        label: &str,
        report: &ScanReport,
        session: &ScanSession,
        report_path: Option<&std::path::Path>,
    ) -> String {
        let mut output = String::new();
        let counts = &session.counts;

        if self.verbosity == VerbosityLevel::Quiet {
            if counts.failing() > 0 || session.is_cancelled() {
                output.push_str(&format!(
                    "Failed: {} Exceptions: {}{}\n",
                    counts.fail,
                    counts.exception,
                    if session.is_cancelled() { " (cancelled)" } else { "" }
                ));
            }
            return output;
        }

        output.push_str(&format!("{} Scan Summary:\n", label));
        output.push_str(&format!("  Root: {}\n", report.root.display()));
        output.push_str(&format!(
            "  Checked: {} of {}\n",
            session.completed(),
            session.total_discovered
        ));
        output.push_str(&format!(
            "  {} {}\n",
            self.colorize("OK:", "32"),
            counts.ok
        ));
        if counts.warn > 0 {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Warnings:", "33"),
                counts.warn
            ));
        }
        if counts.fail > 0 {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Failed:", "31"),
                counts.fail
            ));
        }
        if counts.exception > 0 {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Exceptions:", "35"),
                counts.exception
            ));
        }
        if report.skipped_entries > 0 {
            output.push_str(&format!(
                "  Unreadable entries skipped: {}\n",
                report.skipped_entries
            ));
        }
        if session.state == SessionState::Cancelled {
            output.push_str(&format!(
                "  {} {} file(s) not checked\n",
                self.colorize("Cancelled:", "33"),
                session.total_discovered - session.completed()
            ));
        }

        match report_path {
            Some(path) => output.push_str(&format!("Report written to: {}\n", path.display())),
            None => output.push_str("No report written: no files to report\n"),
        }

        let mut failures: Vec<&ValidationOutcome> = session.failures().collect();
        failures.sort_by(|a, b| a.path.cmp(&b.path));
        if !failures.is_empty() {
            let shown = if self.verbosity >= VerbosityLevel::Verbose {
                failures.len()
            } else {
                FAILURE_SAMPLE_SIZE
            };
            output.push_str(if shown < failures.len() {
                "Sample failures:\n"
            } else {
                "Failures:\n"
            });
            for outcome in failures.iter().take(shown) {
                output.push_str(&self.format_failure(outcome));
                output.push('\n');
            }
        }

        output
    }

    /// `- <path> [<method>] -> <message>`
    pub fn format_failure(&self, outcome: &ValidationOutcome) -> String {
        let marker = match outcome.status {
            ValidationStatus::Warn => self.colorize("-", "33"),
            _ => self.colorize("-", "31"),
        };
        format!(
            "{} {} [{}] -> {}",
            marker,
            outcome.path.display(),
            outcome.method,
            preview_message(&outcome.message)
        )
    }
}

/// Flatten line breaks and cut long messages
pub fn preview_message(message: &str) -> String {
    let flat = message.replace(['\r', '\n'], " ");
    if flat.chars().count() > MESSAGE_PREVIEW_CHARS {
        let cut: String = flat.chars().take(MESSAGE_PREVIEW_CHARS).collect();
        format!("{cut}...")
    } else {
        flat
    }
}

#[derive(Serialize)]
struct JsonSummary<'a> {
    exit_code: u8,
    #[serde(flatten)]
    report: &'a ScanReport,
}

fn format_json(report: &ScanReport) -> String {
    let summary = JsonSummary {
        exit_code: report.exit().code(),
        report,
    };
    match serde_json::to_string_pretty(&summary) {
        Ok(json) => format!("{json}\n"),
        Err(err) => format!("{{\"error\": \"{err}\"}}\n"),
    }
}
