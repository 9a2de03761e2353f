//! External validator tools: definitions, availability probing and the
//! per-session fallback chain.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, ScanError};

/// Placeholder replaced by the target path in argument templates
pub const INPUT_PLACEHOLDER: &str = "{input}";

/// How a tool's run is judged once it exits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticPolicy {
    /// Exit code alone decides; diagnostics on a zero exit are only a warning
    ExitCode,
    /// Success requires a zero exit code and an empty diagnostic stream
    ErrorChannel,
}

/// A validator definition: binary plus fixed argument template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub binary: String,
    pub args: Vec<String>,
    pub diagnostics: DiagnosticPolicy,
}

impl ToolSpec {
    pub fn new(
        name: impl Into<String>,
        binary: impl Into<String>,
        args: &[&str],
        diagnostics: DiagnosticPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            binary: binary.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            diagnostics,
        }
    }

    /// `flac -t -s <file>`: test mode, silent
    pub fn flac() -> Self {
        Self::new(
            "flac",
            "flac",
            &["-t", "-s", INPUT_PLACEHOLDER],
            DiagnosticPolicy::ExitCode,
        )
    }

    /// `ffmpeg -v error -nostats -i <file> -f null -`: decode to the null muxer
    pub fn ffmpeg() -> Self {
        Self::new(
            "ffmpeg",
            "ffmpeg",
            &[
                "-v",
                "error",
                "-nostats",
                "-i",
                INPUT_PLACEHOLDER,
                "-f",
                "null",
                "-",
            ],
            DiagnosticPolicy::ErrorChannel,
        )
    }

    /// Expand the argument template for one input file. A template without
    /// the placeholder gets the input appended as the final argument.
    pub fn invocation(&self, input: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::with_capacity(self.args.len() + 1);
        let mut substituted = false;
        for arg in &self.args {
            if arg == INPUT_PLACEHOLDER {
                args.push(input.as_os_str().to_owned());
                substituted = true;
            } else {
                args.push(OsString::from(arg));
            }
        }
        if !substituted {
            args.push(input.as_os_str().to_owned());
        }
        args
    }
}

/// A target format: which extensions to collect and which tools can check it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatProfile {
    pub name: String,
    pub extensions: Vec<String>,
    /// Tools in fallback order
    pub tools: Vec<String>,
}

impl FormatProfile {
    pub fn new(name: &str, extensions: &[&str], tools: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
            tools: tools.iter().map(|t| t.to_string()).collect(),
        }
    }

    /// Display label, e.g. "FLAC"
    pub fn label(&self) -> String {
        self.name.to_uppercase()
    }
}

/// Known tool definitions and format profiles
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolSpec>,
    profiles: BTreeMap<String, FormatProfile>,
}

impl ToolRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
            profiles: BTreeMap::new(),
        }
    }

    /// Registry with the built-in FLAC and MP3 profiles
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_tool(ToolSpec::flac());
        registry.register_tool(ToolSpec::ffmpeg());
        registry.register_profile(FormatProfile::new("flac", &["flac"], &["flac", "ffmpeg"]));
        registry.register_profile(FormatProfile::new("mp3", &["mp3"], &["ffmpeg"]));
        registry
    }

    /// Registers (or replaces) a tool definition
    pub fn register_tool(&mut self, tool: ToolSpec) {
        self.tools.insert(tool.name.clone(), tool);
    }

    /// Registers (or replaces) a format profile
    pub fn register_profile(&mut self, profile: FormatProfile) {
        self.profiles.insert(profile.name.clone(), profile);
    }

    pub fn tool(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name)
    }

    pub fn profile(&self, name: &str) -> Option<&FormatProfile> {
        self.profiles.get(name)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Resolves a tool binary to an executable path
#[cfg_attr(test, mockall::automock)]
pub trait ToolLocator: Send + Sync {
    fn locate(&self, binary: &str) -> Option<PathBuf>;
}

/// `PATH` lookup through the `which` crate, optionally against an explicit
/// search path instead of the process environment
#[derive(Debug, Clone, Default)]
pub struct PathLocator {
    search_path: Option<OsString>,
}

impl PathLocator {
    pub fn new(search_path: Option<OsString>) -> Self {
        Self { search_path }
    }
}

impl ToolLocator for PathLocator {
    fn locate(&self, binary: &str) -> Option<PathBuf> {
        // Paths given explicitly are used as-is
        let as_path = Path::new(binary);
        if as_path.components().count() > 1 {
            return as_path.is_file().then(|| as_path.to_path_buf());
        }

        match &self.search_path {
            Some(search_path) => {
                let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
                which::which_in(binary, Some(search_path), cwd).ok()
            }
            None => which::which(binary).ok(),
        }
    }
}

/// Probe result for one tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolStatus {
    pub present: bool,
    pub resolved_path: Option<PathBuf>,
}

/// Snapshot of which validators exist on this host. Computed once per
/// session and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct ToolAvailability {
    tools: BTreeMap<String, ToolStatus>,
}

impl ToolAvailability {
    /// Probe every named tool known to the registry
    pub fn probe(registry: &ToolRegistry, names: &[String], locator: &dyn ToolLocator) -> Self {
        let mut tools = BTreeMap::new();
        for name in names {
            let resolved_path = registry
                .tool(name)
                .and_then(|spec| locator.locate(&spec.binary));
            match &resolved_path {
                Some(path) => debug!(tool = %name, path = %path.display(), "tool detected"),
                None => debug!(tool = %name, "tool not found"),
            }
            tools.insert(
                name.clone(),
                ToolStatus {
                    present: resolved_path.is_some(),
                    resolved_path,
                },
            );
        }
        Self { tools }
    }

    pub fn is_available(&self, name: &str) -> bool {
        self.tools.get(name).is_some_and(|status| status.present)
    }

    pub fn resolved_path(&self, name: &str) -> Option<&Path> {
        self.tools
            .get(name)
            .and_then(|status| status.resolved_path.as_deref())
    }

    pub fn any_available(&self) -> bool {
        self.tools.values().any(|status| status.present)
    }

    pub fn status(&self, name: &str) -> Option<&ToolStatus> {
        self.tools.get(name)
    }
}

/// A tool chosen for the session together with its resolved executable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedTool {
    pub spec: ToolSpec,
    pub path: PathBuf,
}

impl SelectedTool {
    pub fn name(&self) -> &str {
        &self.spec.name
    }
}

/// Builds the deterministic per-file fallback chain
pub struct ToolSelector;

impl ToolSelector {
    /// Preferred tool first (when it belongs to the profile and is
    /// available), then the profile's other available tools in profile order.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::EnvironmentError`] when no tool of the profile is
    /// available.
    pub fn order(
        registry: &ToolRegistry,
        profile: &FormatProfile,
        preferred: Option<&str>,
        availability: &ToolAvailability,
    ) -> Result<Vec<SelectedTool>> {
        let mut names: Vec<&str> = Vec::with_capacity(profile.tools.len());
        if let Some(preferred) = preferred
            && profile.tools.iter().any(|t| t == preferred)
        {
            names.push(preferred);
        }
        for name in &profile.tools {
            if !names.contains(&name.as_str()) {
                names.push(name);
            }
        }

        let chain: Vec<SelectedTool> = names
            .into_iter()
            .filter_map(|name| {
                let spec = registry.tool(name)?;
                let path = availability.resolved_path(name)?;
                Some(SelectedTool {
                    spec: spec.clone(),
                    path: path.to_path_buf(),
                })
            })
            .collect();

        if chain.is_empty() {
            return Err(ScanError::EnvironmentError {
                profile: profile.name.clone(),
                tried: profile.tools.clone(),
            });
        }
        Ok(chain)
    }
}
