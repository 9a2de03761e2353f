use std::path::PathBuf;

use thiserror::Error;

/// Main library error type covering every condition that escalates past a
/// single file. Per-file problems never appear here: they are recorded as
/// [`crate::validator::ValidationOutcome`] values instead.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No validator tool for {profile} found in PATH (tried: {})", .tried.join(", "))]
    EnvironmentError { profile: String, tried: Vec<String> },

    #[error("Scan root does not exist: {path}")]
    RootNotFound { path: PathBuf },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Report could not be written to {path} or fallback {fallback}: {source}")]
    ReportWrite {
        path: PathBuf,
        fallback: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Concurrent operation error: {details}")]
    Concurrency { details: String },
}

/// Configuration-specific error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable error: {0}")]
    Environment(String),

    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(String),

    #[error("Unknown format profile: {0}")]
    UnknownProfile(String),

    #[error("Unknown validator tool: {0}")]
    UnknownTool(String),

    #[error("Invalid glob pattern '{pattern}': {details}")]
    InvalidPattern { pattern: String, details: String },
}

impl From<ConfigError> for ScanError {
    fn from(err: ConfigError) -> Self {
        ScanError::Config(err.to_string())
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ScanError>;

/// Configuration result type alias
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
