use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Verbosity levels for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum VerbosityLevel {
    /// Only show failures
    Quiet,
    /// Summary plus a sample of failures
    #[default]
    Normal,
    /// Every failure, plus informational logging
    Verbose,
}

impl VerbosityLevel {
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        if quiet {
            VerbosityLevel::Quiet
        } else if verbose {
            VerbosityLevel::Verbose
        } else {
            VerbosityLevel::Normal
        }
    }

    /// Default tracing filter directive when `RUST_LOG` is unset
    pub fn log_directive(self) -> &'static str {
        match self {
            VerbosityLevel::Quiet => "error",
            VerbosityLevel::Normal => "warn",
            VerbosityLevel::Verbose => "info",
        }
    }
}

/// End-of-run summary format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Human,
    Json,
}

/// Check audio files for corruption with external decoders
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "verify-audio")]
#[command(about = "Check audio files for corruption using external validator tools")]
#[command(version)]
pub struct Cli {
    /// Directory (or single file) to scan
    #[arg(default_value = ".")]
    pub root: PathBuf,

    /// Format profile to scan for (built-in: flac, mp3)
    #[arg(long = "profile")]
    pub profile: Option<String>,

    /// Report file path
    #[arg(short = 'o', long = "output", value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Number of concurrent validations
    #[arg(short = 'w', long = "workers")]
    pub workers: Option<usize>,

    /// Validator tool to try first
    #[arg(long = "prefer", value_name = "TOOL")]
    pub prefer: Option<String>,

    /// Per-file time limit in seconds
    #[arg(long = "timeout", value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Re-check failures with the next available tool
    #[arg(long = "confirm-failures")]
    pub confirm_failures: bool,

    /// Report every file, with technical metadata columns
    #[arg(long = "all-rows")]
    pub all_rows: bool,

    /// Include file patterns (glob syntax)
    #[arg(long = "include", action = clap::ArgAction::Append)]
    pub include_patterns: Vec<String>,

    /// Exclude file patterns (glob syntax)
    #[arg(long = "exclude", action = clap::ArgAction::Append)]
    pub exclude_patterns: Vec<String>,

    /// Maximum directory depth below ROOT
    #[arg(long = "max-depth")]
    pub max_depth: Option<usize>,

    /// Configuration file (TOML or JSON)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Summary format
    #[arg(long = "format", value_enum)]
    pub format: Option<OutputFormat>,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Quiet mode (failures only)
    #[arg(short = 'q', long = "quiet", conflicts_with = "verbose")]
    pub quiet: bool,

    /// Always show progress
    #[arg(long = "progress", conflicts_with = "no_progress")]
    pub progress: bool,

    /// Never show progress
    #[arg(long = "no-progress")]
    pub no_progress: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Progress override given on the command line, if any
    pub fn progress_override(&self) -> Option<bool> {
        if self.progress {
            Some(true)
        } else if self.no_progress {
            Some(false)
        } else {
            None
        }
    }
}
