//! One scan from discovery to exit status.
//!
//! Order matters for the exit contract: targets are discovered before tools
//! are probed (an empty tree passes without any tool installed), and an empty
//! fallback chain aborts before a single job is dispatched.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::adapter::ValidatorAdapter;
use crate::cancel::CancellationController;
use crate::config::{Config, ConfigManager};
use crate::error::{ConfigResult, Result, ScanError};
use crate::file_discovery::{FileDiscovery, Target};
use crate::progress::ProgressReporter;
use crate::report::{ReportMode, ReportWriter};
use crate::session::{ScanExit, ScanSession};
use crate::tools::{FormatProfile, PathLocator, ToolAvailability, ToolLocator, ToolRegistry, ToolSelector};
use crate::validator::{EngineConfig, ValidationEngine};

/// Fully resolved settings for one scan
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub root: PathBuf,
    pub profile: FormatProfile,
    pub registry: ToolRegistry,
    pub preferred: Option<String>,
    pub workers: usize,
    pub timeout: Option<Duration>,
    pub confirm_failures: bool,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub max_depth: Option<usize>,
    pub report_mode: ReportMode,
    pub report_path: PathBuf,
    pub search_path: Option<OsString>,
    pub show_progress: bool,
}

impl ScanOptions {
    /// Built-in registry, default profile settings and `<profile>_errors.csv`
    pub fn new(root: impl Into<PathBuf>, profile: FormatProfile) -> Self {
        let report_path = PathBuf::from(format!("{}_errors.csv", profile.name));
        Self {
            root: root.into(),
            profile,
            registry: ToolRegistry::with_builtins(),
            preferred: None,
            workers: num_cpus::get(),
            timeout: None,
            confirm_failures: false,
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            max_depth: None,
            report_mode: ReportMode::FailuresOnly,
            report_path,
            search_path: None,
            show_progress: false,
        }
    }

    /// Resolve a validated configuration into scan settings
    pub fn from_config(root: impl Into<PathBuf>, config: &Config) -> ConfigResult<Self> {
        let registry = config.registry()?;
        let profile = config.profile(&registry)?;

        Ok(Self {
            root: root.into(),
            profile,
            registry,
            preferred: config.scan.prefer.clone(),
            workers: ConfigManager::get_worker_count(config),
            timeout: ConfigManager::get_timeout_duration(config),
            confirm_failures: config.scan.confirm_failures,
            include_patterns: config.scan.include_patterns.clone(),
            exclude_patterns: config.scan.exclude_patterns.clone(),
            max_depth: config.scan.max_depth,
            report_mode: config.report.mode(),
            report_path: ConfigManager::get_report_path(config)?,
            search_path: config.tools.search_path.as_ref().map(OsString::from),
            show_progress: ConfigManager::show_progress(config),
        })
    }
}

/// How a scan ended
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum ScanOutcome {
    /// Discovery found nothing to check
    NoTargets,
    /// No validator tool of the profile was available
    EnvironmentError { message: String, tried: Vec<String> },
    /// The engine ran; `report` is set when a report file was written
    Finished {
        session: ScanSession,
        report: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub profile: String,
    pub root: PathBuf,
    /// Discovery entries skipped because they could not be read
    pub skipped_entries: usize,
    #[serde(flatten)]
    pub outcome: ScanOutcome,
}

impl ScanReport {
    pub fn exit(&self) -> ScanExit {
        match &self.outcome {
            ScanOutcome::NoTargets => ScanExit::Passed,
            ScanOutcome::EnvironmentError { .. } => ScanExit::EnvironmentError,
            ScanOutcome::Finished { session, .. } => session.exit(),
        }
    }

    pub fn session(&self) -> Option<&ScanSession> {
        match &self.outcome {
            ScanOutcome::Finished { session, .. } => Some(session),
            _ => None,
        }
    }

    pub fn report_path(&self) -> Option<&PathBuf> {
        match &self.outcome {
            ScanOutcome::Finished { report, .. } => report.as_ref(),
            _ => None,
        }
    }
}

/// Run a scan, probing tools on `PATH` (or the configured search path)
pub async fn run(options: ScanOptions, controller: &CancellationController) -> Result<ScanReport> {
    let locator = PathLocator::new(options.search_path.clone());
    run_with_locator(options, controller, Arc::new(locator)).await
}

/// Run a scan with a custom tool locator
pub async fn run_with_locator(
    options: ScanOptions,
    controller: &CancellationController,
    locator: Arc<dyn ToolLocator>,
) -> Result<ScanReport> {
    let (targets, skipped_entries) = discover(&options).await?;
    let report = |outcome| ScanReport {
        profile: options.profile.name.clone(),
        root: options.root.clone(),
        skipped_entries,
        outcome,
    };

    if targets.is_empty() {
        info!(root = %options.root.display(), "no matching files");
        return Ok(report(ScanOutcome::NoTargets));
    }

    let availability =
        ToolAvailability::probe(&options.registry, &options.profile.tools, locator.as_ref());
    let chain = match ToolSelector::order(
        &options.registry,
        &options.profile,
        options.preferred.as_deref(),
        &availability,
    ) {
        Ok(chain) => chain,
        Err(ScanError::EnvironmentError { profile, tried }) => {
            let message = ScanError::EnvironmentError {
                profile,
                tried: tried.clone(),
            }
            .to_string();
            return Ok(report(ScanOutcome::EnvironmentError { message, tried }));
        }
        Err(err) => return Err(err),
    };

    let adapter = ValidatorAdapter::new(chain)
        .with_timeout(options.timeout)
        .with_confirm_failures(options.confirm_failures);
    let engine = ValidationEngine::new(
        adapter,
        EngineConfig {
            workers: options.workers,
            collect_metadata: options.report_mode == ReportMode::AllRows,
        },
    );

    let progress = ProgressReporter::new(targets.len(), options.show_progress);
    let session = engine.run(targets, controller, &progress).await?;
    progress.finish();

    let writer = ReportWriter::new(options.report_mode);
    let report_path = if writer.select(&session.outcomes).is_empty() {
        debug!("nothing to report");
        None
    } else {
        Some(writer.write(&options.report_path, &session.outcomes)?)
    };

    Ok(report(ScanOutcome::Finished {
        session,
        report: report_path,
    }))
}

async fn discover(options: &ScanOptions) -> Result<(Vec<Target>, usize)> {
    let discovery = FileDiscovery::new(options.profile.extensions.clone())
        .with_include_patterns(&options.include_patterns)?
        .with_exclude_patterns(&options.exclude_patterns)?
        .with_max_depth(options.max_depth);
    let root = options.root.clone();

    // The walk is blocking filesystem work
    tokio::task::spawn_blocking(move || -> Result<(Vec<Target>, usize)> {
        let mut walk = discovery.discover(&root)?;
        let targets: Vec<Target> = walk.by_ref().collect();
        Ok((targets, walk.skipped()))
    })
    .await
    .map_err(|e| ScanError::Concurrency {
        details: format!("discovery task join error: {e}"),
    })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::MockToolLocator;
    use tempfile::TempDir;

    fn flac_options(root: &std::path::Path) -> ScanOptions {
        let registry = ToolRegistry::with_builtins();
        let profile = registry.profile("flac").unwrap().clone();
        let mut options = ScanOptions::new(root, profile);
        options.report_path = root.join("flac_errors.csv");
        options
    }

    #[tokio::test]
    async fn test_zero_targets_pass_without_probing() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let mut locator = MockToolLocator::new();
        locator.expect_locate().never();

        let report = run_with_locator(
            flac_options(dir.path()),
            &CancellationController::new(),
            Arc::new(locator),
        )
        .await
        .unwrap();

        assert!(matches!(report.outcome, ScanOutcome::NoTargets));
        assert_eq!(report.exit(), ScanExit::Passed);
        assert!(!dir.path().join("flac_errors.csv").exists());
    }

    #[tokio::test]
    async fn test_missing_tools_abort_before_dispatch() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.flac"), "x").unwrap();

        let mut locator = MockToolLocator::new();
        locator.expect_locate().times(2).returning(|_| None);

        let report = run_with_locator(
            flac_options(dir.path()),
            &CancellationController::new(),
            Arc::new(locator),
        )
        .await
        .unwrap();

        assert_eq!(report.exit(), ScanExit::EnvironmentError);
        assert!(report.session().is_none());
        match &report.outcome {
            ScanOutcome::EnvironmentError { tried, message } => {
                assert_eq!(tried, &["flac", "ffmpeg"]);
                assert!(message.contains("flac"));
            }
            other => panic!("Expected EnvironmentError, got {other:?}"),
        }
        assert!(!dir.path().join("flac_errors.csv").exists());
    }

    #[tokio::test]
    async fn test_missing_root_is_an_error() {
        let dir = TempDir::new().unwrap();
        let options = flac_options(&dir.path().join("absent"));
        let result = run_with_locator(
            options,
            &CancellationController::new(),
            Arc::new(MockToolLocator::new()),
        )
        .await;
        assert!(matches!(result, Err(ScanError::RootNotFound { .. })));
    }

    #[test]
    fn test_options_from_config() {
        let mut config = Config::default();
        config.scan.profile = "mp3".to_string();
        config.scan.workers = Some(2);
        config.scan.timeout_seconds = Some(30);
        config.report.all_rows = true;
        config.tools.search_path = Some("/opt/bin".to_string());

        let options = ScanOptions::from_config("/music", &config).unwrap();
        assert_eq!(options.profile.name, "mp3");
        assert_eq!(options.profile.tools, ["ffmpeg"]);
        assert_eq!(options.workers, 2);
        assert_eq!(options.timeout, Some(Duration::from_secs(30)));
        assert_eq!(options.report_mode, ReportMode::AllRows);
        assert!(options.report_path.ends_with("mp3_scan.csv"));
        assert_eq!(options.search_path, Some(OsString::from("/opt/bin")));
    }

    #[test]
    fn test_report_serializes_outcome_tag() {
        let report = ScanReport {
            profile: "flac".to_string(),
            root: PathBuf::from("/music"),
            skipped_entries: 0,
            outcome: ScanOutcome::NoTargets,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"], "no-targets");
        assert_eq!(json["profile"], "flac");
    }
}
