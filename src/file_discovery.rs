use crate::error::{ConfigError, ConfigResult, Result, ScanError};
use globset::{GlobSet, GlobSetBuilder};
use ignore::{Walk, WalkBuilder};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A single file selected for validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Target {
    path: PathBuf,
    extension: String,
}

impl Target {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        Self { path, extension }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lowercased extension without the leading dot
    pub fn extension(&self) -> &str {
        &self.extension
    }
}

/// Lazy file discovery engine.
///
/// Walks the tree with `ignore` (standard filters off, so hidden files and
/// `.gitignore`d paths are still scanned) without following symbolic links.
/// Directories that cannot be opened are skipped and the walk continues.
#[derive(Debug, Clone)]
pub struct FileDiscovery {
    /// File extensions to include, lowercase and without dots (e.g., ["flac"])
    extensions: Vec<String>,
    /// Include patterns set
    include_set: Option<GlobSet>,
    /// Exclude patterns set
    exclude_set: Option<GlobSet>,
    /// Maximum depth for directory traversal (None = unlimited)
    max_depth: Option<usize>,
}

impl FileDiscovery {
    /// Create a new FileDiscovery instance for the given extensions
    pub fn new(extensions: Vec<String>) -> Self {
        Self {
            extensions: extensions
                .into_iter()
                .map(|ext| ext.trim_start_matches('.').to_lowercase())
                .collect(),
            include_set: None,
            exclude_set: None,
            max_depth: None,
        }
    }

    /// Add include patterns
    pub fn with_include_patterns(mut self, patterns: &[String]) -> ConfigResult<Self> {
        self.include_set = build_glob_set(patterns)?;
        Ok(self)
    }

    /// Add exclude patterns
    pub fn with_exclude_patterns(mut self, patterns: &[String]) -> ConfigResult<Self> {
        self.exclude_set = build_glob_set(patterns)?;
        Ok(self)
    }

    /// Set maximum traversal depth. Files directly under the root are at depth 0.
    pub fn with_max_depth(mut self, depth: Option<usize>) -> Self {
        self.max_depth = depth;
        self
    }

    /// Start discovering targets under `root` (a directory or a single file).
    ///
    /// Only a missing root is an error. The returned iterator is finite and
    /// cannot be restarted; it yields absolute paths in walk order.
    pub fn discover(&self, root: &Path) -> Result<Targets> {
        let root = std::path::absolute(root)?;
        let metadata = match std::fs::metadata(&root) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ScanError::RootNotFound { path: root });
            }
            Err(e) => return Err(ScanError::Io(e)),
        };

        if metadata.is_file() {
            let single = self.should_process(&root).then(|| Target::new(root));
            return Ok(Targets {
                source: Source::Single(single),
                filter: self.clone(),
                skipped: 0,
            });
        }

        let mut builder = WalkBuilder::new(&root);
        builder.standard_filters(false).follow_links(false);
        if let Some(depth) = self.max_depth {
            // The walker counts the root itself as depth 0
            builder.max_depth(Some(depth + 1));
        }

        Ok(Targets {
            source: Source::Walk(builder.build()),
            filter: self.clone(),
            skipped: 0,
        })
    }

    /// Check if a file should be processed based on extensions and patterns
    pub fn should_process(&self, path: &Path) -> bool {
        let Some(extension) = path.extension().and_then(|ext| ext.to_str()) else {
            return false;
        };
        if !self.extensions.contains(&extension.to_lowercase()) {
            return false;
        }

        // Check exclude patterns first
        if let Some(exclude_set) = &self.exclude_set
            && exclude_set.is_match(path)
        {
            return false;
        }

        // Check include patterns (if any are specified, at least one must match)
        if let Some(include_set) = &self.include_set {
            return include_set.is_match(path);
        }

        true
    }
}

fn build_glob_set(patterns: &[String]) -> ConfigResult<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }

    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = globset::GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| ConfigError::InvalidPattern {
                pattern: pattern.clone(),
                details: e.to_string(),
            })?;
        builder.add(glob);
    }

    let set = builder.build().map_err(|e| ConfigError::InvalidPattern {
        pattern: patterns.join(","),
        details: e.to_string(),
    })?;
    Ok(Some(set))
}

enum Source {
    Single(Option<Target>),
    Walk(Walk),
}

/// Lazy sequence of discovered targets.
pub struct Targets {
    source: Source,
    filter: FileDiscovery,
    skipped: usize,
}

impl Targets {
    /// Number of entries that could not be read so far (their subtrees are absent)
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl Iterator for Targets {
    type Item = Target;

    fn next(&mut self) -> Option<Target> {
        let walk = match &mut self.source {
            Source::Single(single) => return single.take(),
            Source::Walk(walk) => walk,
        };

        loop {
            match walk.next()? {
                Ok(entry) => {
                    let is_file = entry.file_type().is_some_and(|ft| ft.is_file());
                    if is_file && self.filter.should_process(entry.path()) {
                        return Some(Target::new(entry.into_path()));
                    }
                }
                Err(err) => {
                    debug!(error = %err, "skipping unreadable entry");
                    self.skipped += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::fs;
    use tempfile::TempDir;

    fn create_test_directory() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        fs::create_dir_all(root.join("Artist/Album")).unwrap();
        fs::create_dir_all(root.join("Other/Deep/Nested")).unwrap();

        fs::write(root.join("single.flac"), b"fLaC").unwrap();
        fs::write(root.join("LOUD.FLAC"), b"fLaC").unwrap();
        fs::write(root.join("cover.jpg"), b"jpg").unwrap();
        fs::write(root.join("Artist/Album/01 - Intro.flac"), b"fLaC").unwrap();
        fs::write(root.join("Artist/Album/02 - Song.mp3"), b"ID3").unwrap();
        fs::write(root.join("Other/Deep/Nested/deep.flac"), b"fLaC").unwrap();
        fs::write(root.join("Other/.hidden.flac"), b"fLaC").unwrap();

        temp_dir
    }

    fn names(targets: impl Iterator<Item = Target>) -> HashSet<String> {
        targets
            .map(|t| t.path().file_name().unwrap().to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn test_discover_flac_files_case_insensitive() {
        let temp_dir = create_test_directory();
        let discovery = FileDiscovery::new(vec!["flac".to_string()]);

        let found = names(discovery.discover(temp_dir.path()).unwrap());

        assert_eq!(found.len(), 5);
        assert!(found.contains("single.flac"));
        assert!(found.contains("LOUD.FLAC"));
        assert!(found.contains("01 - Intro.flac"));
        assert!(found.contains("deep.flac"));
        assert!(found.contains(".hidden.flac"));
    }

    #[test]
    fn test_targets_are_absolute() {
        let temp_dir = create_test_directory();
        let discovery = FileDiscovery::new(vec!["mp3".to_string()]);

        let targets: Vec<Target> = discovery.discover(temp_dir.path()).unwrap().collect();

        assert_eq!(targets.len(), 1);
        assert!(targets[0].path().is_absolute());
        assert_eq!(targets[0].extension(), "mp3");
    }

    #[test]
    fn test_extension_normalization() {
        let discovery = FileDiscovery::new(vec![".FLAC".to_string()]);
        assert!(discovery.should_process(Path::new("a.flac")));
        assert!(discovery.should_process(Path::new("B.Flac")));
        assert!(!discovery.should_process(Path::new("a.mp3")));
        assert!(!discovery.should_process(Path::new("flac")));
    }

    #[test]
    fn test_max_depth_limit() {
        let temp_dir = create_test_directory();
        let discovery = FileDiscovery::new(vec!["flac".to_string()]).with_max_depth(Some(0));

        let found = names(discovery.discover(temp_dir.path()).unwrap());

        assert_eq!(found.len(), 2);
        assert!(found.contains("single.flac"));
        assert!(found.contains("LOUD.FLAC"));
    }

    #[test]
    fn test_include_and_exclude_patterns() {
        let temp_dir = create_test_directory();
        let discovery = FileDiscovery::new(vec!["flac".to_string()])
            .with_exclude_patterns(&["**/Other/**".to_string()])
            .unwrap()
            .with_include_patterns(&["**/Artist/**".to_string()])
            .unwrap();

        let found = names(discovery.discover(temp_dir.path()).unwrap());

        assert_eq!(found, HashSet::from(["01 - Intro.flac".to_string()]));
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let result =
            FileDiscovery::new(vec!["flac".to_string()]).with_include_patterns(&["[".to_string()]);
        assert!(matches!(result, Err(ConfigError::InvalidPattern { .. })));
    }

    #[test]
    fn test_single_file_root() {
        let temp_dir = create_test_directory();
        let discovery = FileDiscovery::new(vec!["flac".to_string()]);

        let file = temp_dir.path().join("single.flac");
        let targets: Vec<Target> = discovery.discover(&file).unwrap().collect();
        assert_eq!(targets.len(), 1);

        let other = temp_dir.path().join("cover.jpg");
        assert_eq!(discovery.discover(&other).unwrap().count(), 0);
    }

    #[test]
    fn test_nonexistent_root() {
        let discovery = FileDiscovery::new(vec!["flac".to_string()]);
        let result = discovery.discover(Path::new("/nonexistent/music/root"));

        match result {
            Err(ScanError::RootNotFound { path }) => {
                assert!(path.ends_with("root"));
            }
            _ => panic!("Expected RootNotFound"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_not_followed() {
        let temp_dir = create_test_directory();
        let root = temp_dir.path();
        std::os::unix::fs::symlink(root, root.join("Artist/loop")).unwrap();
        std::os::unix::fs::symlink(root.join("single.flac"), root.join("alias.flac")).unwrap();

        let discovery = FileDiscovery::new(vec!["flac".to_string()]);
        let targets: Vec<Target> = discovery.discover(root).unwrap().collect();

        assert_eq!(targets.len(), 5);
        assert!(targets.iter().all(|t| !t.path().ends_with("alias.flac")));
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_directory_is_skipped() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = create_test_directory();
        let locked = temp_dir.path().join("Locked");
        fs::create_dir(&locked).unwrap();
        fs::write(locked.join("hidden.flac"), b"fLaC").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // Privileged users can read the directory anyway; nothing to assert then
        let readable = fs::read_dir(&locked).is_ok();

        let discovery = FileDiscovery::new(vec!["flac".to_string()]);
        let mut targets = discovery.discover(temp_dir.path()).unwrap();
        let found = names(targets.by_ref());
        let skipped = targets.skipped();

        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        if !readable {
            assert_eq!(found.len(), 5);
            assert!(!found.contains("hidden.flac"));
            assert!(skipped >= 1);
        }
    }
}
