use crate::cli::{Cli, OutputFormat, VerbosityLevel};
use crate::error::{ConfigError, ConfigResult};
use crate::report::{ReportMode, default_report_name};
use crate::tools::{DiagnosticPolicy, FormatProfile, ToolRegistry, ToolSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Trait for abstracting environment variable access
pub trait EnvProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// System environment variable provider for production use
pub struct SystemEnvProvider;

impl EnvProvider for SystemEnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

const CONFIG_NAMES: [&str; 4] = [
    "verify-audio.toml",
    "verify-audio.json",
    ".verify-audio.toml",
    ".verify-audio.json",
];

/// Complete configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub scan: ScanConfig,
    pub tools: ToolsConfig,
    /// Additional or overridden format profiles, keyed by profile name
    pub formats: BTreeMap<String, FormatConfig>,
    pub report: ReportConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScanConfig {
    pub profile: String,
    /// Concurrent validations; `None` uses the CPU count
    pub workers: Option<usize>,
    pub prefer: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub confirm_failures: bool,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub max_depth: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ToolsConfig {
    /// Replaces `PATH` when probing for validator binaries
    pub search_path: Option<String>,
    pub definitions: BTreeMap<String, ToolDefinition>,
}

/// A tool definition or a partial override of a built-in one
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ToolDefinition {
    pub binary: Option<String>,
    pub args: Option<Vec<String>>,
    pub diagnostics: Option<DiagnosticPolicy>,
}

/// A format profile or a partial override of a built-in one
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct FormatConfig {
    pub extensions: Option<Vec<String>>,
    pub tools: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ReportConfig {
    /// Report path; `None` uses `<profile>_errors.csv` / `<profile>_scan.csv`
    pub output: Option<PathBuf>,
    pub all_rows: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct OutputConfig {
    pub format: OutputFormat,
    pub verbose: bool,
    pub quiet: bool,
    /// `None` shows progress only when stderr is a terminal
    pub progress: Option<bool>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            profile: "flac".to_string(),
            workers: None,
            prefer: None,
            timeout_seconds: None,
            confirm_failures: false,
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            max_depth: None,
        }
    }
}

impl ReportConfig {
    pub fn mode(&self) -> ReportMode {
        if self.all_rows {
            ReportMode::AllRows
        } else {
            ReportMode::FailuresOnly
        }
    }
}

impl OutputConfig {
    pub fn verbosity(&self) -> VerbosityLevel {
        VerbosityLevel::from_flags(self.verbose, self.quiet)
    }
}

impl Config {
    /// Built-in tools and profiles with this configuration's additions applied
    pub fn registry(&self) -> ConfigResult<ToolRegistry> {
        let mut registry = ToolRegistry::with_builtins();

        for (name, definition) in &self.tools.definitions {
            let mut spec = registry.tool(name).cloned().unwrap_or_else(|| ToolSpec {
                name: name.clone(),
                binary: name.clone(),
                args: Vec::new(),
                diagnostics: DiagnosticPolicy::ExitCode,
            });
            if let Some(binary) = &definition.binary {
                spec.binary = binary.clone();
            }
            if let Some(args) = &definition.args {
                spec.args = args.clone();
            }
            if let Some(diagnostics) = definition.diagnostics {
                spec.diagnostics = diagnostics;
            }
            if spec.binary.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Tool '{name}' has an empty binary"
                )));
            }
            registry.register_tool(spec);
        }

        for (name, format) in &self.formats {
            let base = registry.profile(name).cloned();
            let extensions = format
                .extensions
                .clone()
                .or_else(|| base.as_ref().map(|p| p.extensions.clone()))
                .unwrap_or_else(|| vec![name.clone()]);
            let tools = match format.tools.clone().or_else(|| base.map(|p| p.tools)) {
                Some(tools) => tools,
                None => {
                    return Err(ConfigError::Validation(format!(
                        "Format '{name}' does not name any validator tools"
                    )));
                }
            };
            registry.register_profile(FormatProfile {
                name: name.clone(),
                extensions,
                tools,
            });
        }

        Ok(registry)
    }

    /// The selected profile, resolved against the registry
    pub fn profile(&self, registry: &ToolRegistry) -> ConfigResult<FormatProfile> {
        registry
            .profile(&self.scan.profile)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownProfile(self.scan.profile.clone()))
    }
}

/// Configuration manager for loading and merging configurations
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration with precedence: defaults -> file -> environment -> CLI
    pub async fn load_config(cli: &Cli) -> ConfigResult<Config> {
        Self::load_config_with(cli, &SystemEnvProvider).await
    }

    /// Same as [`ConfigManager::load_config`] with a custom environment provider
    pub async fn load_config_with(cli: &Cli, env: &impl EnvProvider) -> ConfigResult<Config> {
        let mut config = match &cli.config {
            Some(config_path) => Self::load_from_file(config_path).await?,
            None => Self::find_config_file().await?.unwrap_or_default(),
        };

        config = Self::apply_environment_overrides_with(env, config)?;
        config = Self::merge_with_cli(config, cli);

        Self::validate_config(&config)?;

        Ok(config)
    }

    /// Load configuration from a file (TOML or JSON)
    pub async fn load_from_file(path: &Path) -> ConfigResult<Config> {
        let content = tokio::fs::read_to_string(path).await?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(toml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => {
                // Try to parse as TOML first, then JSON
                if let Ok(config) = toml::from_str::<Config>(&content) {
                    Ok(config)
                } else {
                    Ok(serde_json::from_str(&content)?)
                }
            }
        }
    }

    /// Find configuration file in standard locations
    pub async fn find_config_file() -> ConfigResult<Option<Config>> {
        for name in &CONFIG_NAMES {
            let path = PathBuf::from(name);
            if path.exists() {
                return Ok(Some(Self::load_from_file(&path).await?));
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let app_config_dir = config_dir.join("verify-audio");
            for name in &CONFIG_NAMES {
                let path = app_config_dir.join(name);
                if path.exists() {
                    return Ok(Some(Self::load_from_file(&path).await?));
                }
            }
        }

        Ok(None)
    }

    /// Apply environment variable overrides with a custom environment provider
    pub fn apply_environment_overrides_with(
        env: &impl EnvProvider,
        mut config: Config,
    ) -> ConfigResult<Config> {
        if let Some(workers) = env.get("VERIFY_AUDIO_WORKERS") {
            config.scan.workers = Some(parse_env("VERIFY_AUDIO_WORKERS", &workers)?);
        }
        if let Some(prefer) = env.get("VERIFY_AUDIO_PREFER") {
            config.scan.prefer = Some(prefer);
        }
        if let Some(profile) = env.get("VERIFY_AUDIO_PROFILE") {
            config.scan.profile = profile;
        }
        if let Some(timeout) = env.get("VERIFY_AUDIO_TIMEOUT") {
            config.scan.timeout_seconds = Some(parse_env("VERIFY_AUDIO_TIMEOUT", &timeout)?);
        }

        if let Some(output) = env.get("VERIFY_AUDIO_OUTPUT") {
            config.report.output = Some(PathBuf::from(output));
        }
        if let Some(all_rows) = env.get("VERIFY_AUDIO_ALL_ROWS") {
            config.report.all_rows = parse_env("VERIFY_AUDIO_ALL_ROWS", &all_rows)?;
        }

        if let Some(verbose) = env.get("VERIFY_AUDIO_VERBOSE") {
            config.output.verbose = parse_env("VERIFY_AUDIO_VERBOSE", &verbose)?;
        }
        if let Some(quiet) = env.get("VERIFY_AUDIO_QUIET") {
            config.output.quiet = parse_env("VERIFY_AUDIO_QUIET", &quiet)?;
        }
        if let Some(format) = env.get("VERIFY_AUDIO_FORMAT") {
            config.output.format = match format.to_lowercase().as_str() {
                "human" => OutputFormat::Human,
                "json" => OutputFormat::Json,
                _ => {
                    return Err(ConfigError::Environment(format!(
                        "Invalid VERIFY_AUDIO_FORMAT value: {format}"
                    )));
                }
            };
        }

        if let Some(search_path) = env.get("VERIFY_AUDIO_TOOL_PATH") {
            config.tools.search_path = Some(search_path);
        }

        Ok(config)
    }

    /// Merge CLI arguments with configuration (CLI takes precedence when given)
    pub fn merge_with_cli(mut config: Config, cli: &Cli) -> Config {
        if let Some(profile) = &cli.profile {
            config.scan.profile = profile.clone();
        }
        if cli.workers.is_some() {
            config.scan.workers = cli.workers;
        }
        if cli.prefer.is_some() {
            config.scan.prefer = cli.prefer.clone();
        }
        if cli.timeout.is_some() {
            config.scan.timeout_seconds = cli.timeout;
        }
        if cli.confirm_failures {
            config.scan.confirm_failures = true;
        }
        if !cli.include_patterns.is_empty() {
            config.scan.include_patterns = cli.include_patterns.clone();
        }
        if !cli.exclude_patterns.is_empty() {
            config.scan.exclude_patterns = cli.exclude_patterns.clone();
        }
        if cli.max_depth.is_some() {
            config.scan.max_depth = cli.max_depth;
        }

        if cli.output.is_some() {
            config.report.output = cli.output.clone();
        }
        if cli.all_rows {
            config.report.all_rows = true;
        }

        if let Some(format) = cli.format {
            config.output.format = format;
        }
        // A flag on the command line replaces the other one from lower layers
        if cli.verbose {
            config.output.verbose = true;
            config.output.quiet = false;
        }
        if cli.quiet {
            config.output.quiet = true;
            config.output.verbose = false;
        }
        if let Some(progress) = cli.progress_override() {
            config.output.progress = Some(progress);
        }

        config
    }

    /// Validate configuration values
    pub fn validate_config(config: &Config) -> ConfigResult<()> {
        if let Some(workers) = config.scan.workers {
            if workers == 0 {
                return Err(ConfigError::Validation(
                    "Number of workers must be greater than 0".to_string(),
                ));
            }
            if workers > 1000 {
                return Err(ConfigError::Validation(
                    "Number of workers cannot exceed 1000".to_string(),
                ));
            }
        }

        if config.scan.timeout_seconds == Some(0) {
            return Err(ConfigError::Validation(
                "Timeout must be greater than 0".to_string(),
            ));
        }

        if config.output.verbose && config.output.quiet {
            return Err(ConfigError::Validation(
                "Cannot enable both verbose and quiet modes".to_string(),
            ));
        }

        let registry = config.registry()?;
        let profile = config.profile(&registry)?;

        for tool in &profile.tools {
            if registry.tool(tool).is_none() {
                return Err(ConfigError::UnknownTool(tool.clone()));
            }
        }
        if profile.tools.is_empty() {
            return Err(ConfigError::Validation(format!(
                "Format '{}' does not name any validator tools",
                profile.name
            )));
        }

        if let Some(prefer) = &config.scan.prefer
            && !profile.tools.contains(prefer)
        {
            return Err(ConfigError::Validation(format!(
                "Preferred tool '{}' is not one of the {} tools ({})",
                prefer,
                profile.name,
                profile.tools.join(", ")
            )));
        }

        if profile.extensions.is_empty() {
            return Err(ConfigError::Validation(
                "At least one file extension must be specified".to_string(),
            ));
        }
        for ext in &profile.extensions {
            if ext.is_empty() || ext.contains('/') || ext.contains('\\') || ext.contains('.') {
                return Err(ConfigError::Validation(format!(
                    "Invalid file extension: {ext}"
                )));
            }
        }

        Ok(())
    }

    /// Get the effective worker count
    pub fn get_worker_count(config: &Config) -> usize {
        config.scan.workers.unwrap_or_else(num_cpus::get)
    }

    /// Per-file deadline, if any
    pub fn get_timeout_duration(config: &Config) -> Option<Duration> {
        config.scan.timeout_seconds.map(Duration::from_secs)
    }

    /// Report destination, made absolute against the current directory
    pub fn get_report_path(config: &Config) -> ConfigResult<PathBuf> {
        let path = config.report.output.clone().unwrap_or_else(|| {
            PathBuf::from(default_report_name(&config.scan.profile, config.report.mode()))
        });
        Ok(std::path::absolute(path)?)
    }

    /// Whether the progress line is rendered
    pub fn show_progress(config: &Config) -> bool {
        config
            .output
            .progress
            .unwrap_or_else(|| atty::is(atty::Stream::Stderr) && !config.output.quiet)
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> ConfigResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Environment(format!("Invalid {key} value: {value}")))
}
