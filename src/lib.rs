//! # verify-audio Library
//!
//! Concurrent corruption checking for audio collections. Decoding is delegated
//! to external validator tools (`flac`, `ffmpeg`, or configured ones); this
//! crate discovers targets, runs the tools on a bounded pool, aggregates the
//! outcomes, handles interruption and writes a CSV report.

pub mod adapter;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod decode;
pub mod error;
pub mod file_discovery;
pub mod metadata;
pub mod output;
pub mod progress;
pub mod report;
pub mod scan;
pub mod session;
pub mod tools;
pub mod validator;

pub use adapter::{JobResult, ValidatorAdapter};
pub use cancel::CancellationController;
pub use cli::{Cli, OutputFormat, VerbosityLevel};
pub use config::{Config, ConfigManager, EnvProvider, SystemEnvProvider};
pub use error::{ConfigError, ScanError};
pub use file_discovery::{FileDiscovery, Target, Targets};
pub use metadata::TechnicalMetadata;
pub use output::Output;
pub use progress::ProgressReporter;
pub use report::{ReportMode, ReportWriter};
pub use scan::{ScanOptions, ScanOutcome, ScanReport};
pub use session::{ResultAggregator, ScanExit, ScanSession, SessionState, StatusCounts};
pub use tools::{
    DiagnosticPolicy, FormatProfile, PathLocator, SelectedTool, ToolAvailability, ToolLocator,
    ToolRegistry, ToolSelector, ToolSpec,
};
pub use validator::{EngineConfig, ValidationEngine, ValidationOutcome, ValidationStatus};
