//! CSV report output.

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, ScanError};
use crate::validator::ValidationOutcome;

pub const FAILURE_HEADER: [&str; 3] = ["path", "method", "error"];
pub const ALL_ROWS_HEADER: [&str; 9] = [
    "path",
    "status",
    "method",
    "error",
    "duration_seconds",
    "bit_rate_kbps",
    "sample_rate_hz",
    "channels",
    "file_size_bytes",
];

/// Which outcomes become rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportMode {
    /// Non-ok outcomes only, `path,method,error`
    #[default]
    FailuresOnly,
    /// Every outcome with its status and technical metadata
    AllRows,
}

#[derive(Serialize)]
struct FailureRow<'a> {
    path: String,
    method: &'a str,
    error: &'a str,
}

#[derive(Serialize)]
struct FullRow<'a> {
    path: String,
    status: &'static str,
    method: &'a str,
    error: &'a str,
    duration_seconds: Option<f64>,
    bit_rate_kbps: Option<u32>,
    sample_rate_hz: Option<u32>,
    channels: Option<u8>,
    file_size_bytes: Option<u64>,
}

impl<'a> From<&'a ValidationOutcome> for FullRow<'a> {
    fn from(outcome: &'a ValidationOutcome) -> Self {
        let metadata = outcome.metadata.clone().unwrap_or_default();
        Self {
            path: outcome.path.to_string_lossy().into_owned(),
            status: outcome.status.as_str(),
            method: &outcome.method,
            error: &outcome.message,
            duration_seconds: metadata.duration_seconds,
            bit_rate_kbps: metadata.bit_rate_kbps,
            sample_rate_hz: metadata.sample_rate_hz,
            channels: metadata.channels,
            file_size_bytes: metadata.file_size_bytes,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReportWriter {
    mode: ReportMode,
}

impl ReportWriter {
    pub fn new(mode: ReportMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> ReportMode {
        self.mode
    }

    /// Outcomes this writer would emit, sorted by path
    pub fn select<'a>(&self, outcomes: &'a [ValidationOutcome]) -> Vec<&'a ValidationOutcome> {
        let mut rows: Vec<&ValidationOutcome> = outcomes
            .iter()
            .filter(|o| self.mode == ReportMode::AllRows || o.status.is_reportable())
            .collect();
        rows.sort_by(|a, b| a.path.cmp(&b.path));
        rows
    }

    /// Write the report and return the path actually written.
    ///
    /// When `path` is not writable (permission denied, or it names a
    /// directory) the report goes to a timestamped sibling instead. If the
    /// sibling is denied too, the same name is used in the temp directory.
    pub fn write(&self, path: &Path, outcomes: &[ValidationOutcome]) -> Result<PathBuf> {
        let rows = self.select(outcomes);

        let written = match self.write_to(path, &rows) {
            Ok(()) => path.to_path_buf(),
            Err(err) if is_unwritable(path, &err) => {
                let name = fallback_name(path, Local::now());
                let sibling = path.with_file_name(&name);
                warn!(
                    path = %path.display(),
                    fallback = %sibling.display(),
                    error = %err,
                    "report destination not writable, using fallback"
                );
                match self.write_to(&sibling, &rows) {
                    Ok(()) => sibling,
                    Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
                        let relocated = std::env::temp_dir().join(&name);
                        warn!(
                            fallback = %relocated.display(),
                            error = %err,
                            "report directory not writable, using temp directory"
                        );
                        self.write_to(&relocated, &rows)
                            .map_err(|source| ScanError::ReportWrite {
                                path: path.to_path_buf(),
                                fallback: relocated.clone(),
                                source,
                            })?;
                        relocated
                    }
                    Err(source) => {
                        return Err(ScanError::ReportWrite {
                            path: path.to_path_buf(),
                            fallback: sibling,
                            source,
                        });
                    }
                }
            }
            Err(err) => return Err(ScanError::Io(err)),
        };

        info!(path = %written.display(), rows = rows.len(), "report written");
        Ok(written)
    }

    fn write_to(&self, path: &Path, rows: &[&ValidationOutcome]) -> io::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let file = File::create(path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(BufWriter::new(file));

        match self.mode {
            ReportMode::FailuresOnly => {
                writer.write_record(FAILURE_HEADER)?;
                for outcome in rows {
                    writer.serialize(FailureRow {
                        path: outcome.path.to_string_lossy().into_owned(),
                        method: &outcome.method,
                        error: &outcome.message,
                    })?;
                }
            }
            ReportMode::AllRows => {
                writer.write_record(ALL_ROWS_HEADER)?;
                for outcome in rows {
                    writer.serialize(FullRow::from(*outcome))?;
                }
            }
        }

        writer.flush()
    }
}

fn is_unwritable(path: &Path, err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::PermissionDenied | io::ErrorKind::IsADirectory
    ) || path.is_dir()
}

/// `<stem>_<YYYYmmdd_HHMMSS><.ext>` beside `path`
pub fn fallback_path(path: &Path, at: DateTime<Local>) -> PathBuf {
    path.with_file_name(fallback_name(path, at))
}

fn fallback_name(path: &Path, at: DateTime<Local>) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "report".to_string());
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    format!("{stem}_{}{extension}", at.format("%Y%m%d_%H%M%S"))
}

/// Default report file name for a profile
pub fn default_report_name(profile: &str, mode: ReportMode) -> String {
    match mode {
        ReportMode::FailuresOnly => format!("{profile}_errors.csv"),
        ReportMode::AllRows => format!("{profile}_scan.csv"),
    }
}
