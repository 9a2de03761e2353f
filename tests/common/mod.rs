//! Shared helpers: fake validator tools and sample music trees.
#![allow(dead_code)]

use std::ffi::OsString;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use verify_audio::{ScanOptions, ToolRegistry};

/// Marker that makes the fake tools report corruption
pub const CORRUPT: &str = "CORRUPT";
/// Marker that makes the slow fake tool hang until killed
pub const SLOW: &str = "SLOW";

/// A directory of shell scripts standing in for real validators
pub struct FakeTools {
    dir: TempDir,
}

impl FakeTools {
    /// An empty search path: no validator is installed
    pub fn none() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn search_path(&self) -> OsString {
        self.dir.path().as_os_str().to_owned()
    }

    pub fn install(&self, name: &str, body: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// `flac -t -s FILE`: exit 1 with a decoder error for corrupt files
    pub fn with_flac(self) -> Self {
        self.install(
            "flac",
            r#"for last; do :; done
if grep -q CORRUPT "$last"; then
  echo "$last: ERROR while decoding data" >&2
  echo "state = FLAC__STREAM_DECODER_READ_FRAME" >&2
  exit 1
fi
exit 0"#,
        );
        self
    }

    /// `ffmpeg ... -i FILE ...`: always exits 0, complains on stderr for corrupt files
    pub fn with_ffmpeg(self) -> Self {
        self.install(
            "ffmpeg",
            r#"prev=""
for arg; do
  if [ "$prev" = "-i" ]; then input="$arg"; fi
  prev="$arg"
done
if grep -q CORRUPT "$input"; then
  echo "[flac @ 0x55d0] invalid residual" >&2
fi
exit 0"#,
        );
        self
    }

    /// A flac that hangs on slow files, logging the PID of each hung process
    pub fn with_slow_flac(self) -> Self {
        let pid_log = self.pid_log();
        self.install(
            "flac",
            &format!(
                r#"for last; do :; done
if grep -q SLOW "$last"; then
  echo $$ >> '{}'
  exec sleep 30
fi
exit 0"#,
                pid_log.display()
            ),
        );
        self
    }

    pub fn pid_log(&self) -> PathBuf {
        self.dir.path().join("pids.log")
    }

    /// PIDs of every hung tool process started so far
    pub fn hung_pids(&self) -> Vec<String> {
        fs::read_to_string(self.pid_log())
            .unwrap_or_default()
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect()
    }
}

pub fn process_alive(pid: &str) -> bool {
    std::process::Command::new("kill")
        .args(["-0", pid])
        .stderr(std::process::Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// A temporary tree holding the given files
pub fn music_dir(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (name, content) in files {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }
    dir
}

/// FLAC scan options pointed at `tools`, reporting into `report_dir`
pub fn flac_options(root: &Path, tools: &FakeTools, report_dir: &Path) -> ScanOptions {
    let registry = ToolRegistry::with_builtins();
    let profile = registry.profile("flac").unwrap().clone();
    let mut options = ScanOptions::new(root, profile);
    options.search_path = Some(tools.search_path());
    options.report_path = report_dir.join("flac_errors.csv");
    options.workers = 4;
    options
}
