//! Runs external validators against one file and classifies the result.
//!
//! Each tool in the session's chain is spawned with its argument template,
//! stdin closed and both output streams captured. The wait is raced against
//! the cancellation token and the optional per-file deadline; whichever wins
//! first decides, and a losing child is killed and reaped before returning.
//!
//! On unix every tool runs in its own process group, so a terminal Ctrl-C
//! reaches only the scanner and in-flight tools are stopped by the adapter.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How long a tool killed by an interrupt signal waits for session cancellation
const SIGNAL_GRACE: Duration = Duration::from_millis(500);

use crate::decode::decode_output;
use crate::file_discovery::Target;
use crate::tools::{DiagnosticPolicy, SelectedTool};
use crate::validator::{METHOD_EXCEPTION, METHOD_NONE, ValidationOutcome, ValidationStatus};

/// Result of one job
#[derive(Debug, Clone, PartialEq)]
pub enum JobResult {
    Finished(ValidationOutcome),
    /// Operator cancellation reached the job; no outcome is recorded
    Interrupted,
}

/// Result of running a single tool
enum ToolRun {
    Completed(ValidationOutcome),
    /// The binary disappeared between probing and spawning
    Unavailable,
    Interrupted,
}

enum Interruption {
    Cancelled,
    TimedOut(Duration),
}

#[derive(Debug, Clone)]
pub struct ValidatorAdapter {
    chain: Vec<SelectedTool>,
    timeout: Option<Duration>,
    confirm_failures: bool,
    force_utf8_locale: bool,
}

impl ValidatorAdapter {
    pub fn new(chain: Vec<SelectedTool>) -> Self {
        Self {
            chain,
            timeout: None,
            confirm_failures: false,
            force_utf8_locale: std::env::var_os("LANG").is_none(),
        }
    }

    /// Per-file deadline; expiry kills the tool and records a failure
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Re-check failures with the next tool in the chain
    pub fn with_confirm_failures(mut self, confirm: bool) -> Self {
        self.confirm_failures = confirm;
        self
    }

    pub fn chain(&self) -> &[SelectedTool] {
        &self.chain
    }

    /// Validate one target, walking the chain until a tool produces a verdict.
    pub async fn validate(&self, target: &Target, token: &CancellationToken) -> JobResult {
        let path = target.path();
        let mut pending_failure: Option<ValidationOutcome> = None;

        for (index, tool) in self.chain.iter().enumerate() {
            if token.is_cancelled() {
                return JobResult::Interrupted;
            }

            match self.run_tool(tool, path, token).await {
                ToolRun::Completed(outcome) => {
                    let has_next = index + 1 < self.chain.len();
                    if self.confirm_failures && has_next && outcome.status == ValidationStatus::Fail
                    {
                        debug!(
                            path = %path.display(),
                            tool = tool.name(),
                            "failure reported, confirming with next tool"
                        );
                        pending_failure = Some(outcome);
                        continue;
                    }
                    return JobResult::Finished(outcome);
                }
                ToolRun::Unavailable => {
                    warn!(
                        tool = tool.name(),
                        path = %tool.path.display(),
                        "validator vanished since probe, trying next"
                    );
                }
                ToolRun::Interrupted => return JobResult::Interrupted,
            }
        }

        JobResult::Finished(pending_failure.unwrap_or_else(|| {
            ValidationOutcome::exception(path, METHOD_NONE, "no validator tool available")
        }))
    }

    async fn run_tool(&self, tool: &SelectedTool, path: &Path, token: &CancellationToken) -> ToolRun {
        let mut command = Command::new(&tool.path);
        command
            .args(tool.spec.invocation(path))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        if self.force_utf8_locale {
            command.env("LANG", "C.UTF-8");
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return ToolRun::Unavailable,
            Err(err) => {
                return ToolRun::Completed(ValidationOutcome::exception(
                    path,
                    METHOD_EXCEPTION,
                    format!("failed to start {}: {}", tool.name(), err),
                ));
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let interruption = tokio::select! {
            biased;
            _ = token.cancelled() => Interruption::Cancelled,
            _ = tokio::time::sleep(self.timeout.unwrap_or_default()), if self.timeout.is_some() => {
                Interruption::TimedOut(self.timeout.unwrap_or_default())
            }
            (status, out, err) = async {
                tokio::join!(child.wait(), read_stream(stdout), read_stream(stderr))
            } => {
                return match status {
                    Ok(status) if token.is_cancelled() => {
                        debug!(tool = tool.name(), %status, "tool exited after cancellation");
                        ToolRun::Interrupted
                    }
                    Ok(status) if killed_by_interrupt(status) => {
                        interrupted_run(tool, path, status, token).await
                    }
                    Ok(status) => ToolRun::Completed(classify(tool, path, status, &out, &err)),
                    Err(err) => ToolRun::Completed(ValidationOutcome::exception(
                        path,
                        METHOD_EXCEPTION,
                        format!("failed to wait for {}: {}", tool.name(), err),
                    )),
                };
            }
        };

        // Kill and reap so that no child outlives the job
        if let Err(err) = child.kill().await {
            debug!(tool = tool.name(), error = %err, "kill after interruption failed");
        }

        match interruption {
            Interruption::Cancelled => ToolRun::Interrupted,
            Interruption::TimedOut(limit) => ToolRun::Completed(ValidationOutcome::fail(
                path,
                tool.name(),
                format!("timed out after {}s", limit.as_secs()),
            )),
        }
    }
}

/// A run ended by SIGINT or SIGTERM says nothing about the file. It is
/// dropped when the session is being cancelled and recorded as an
/// exception otherwise.
async fn interrupted_run(
    tool: &SelectedTool,
    path: &Path,
    status: ExitStatus,
    token: &CancellationToken,
) -> ToolRun {
    if tokio::time::timeout(SIGNAL_GRACE, token.cancelled()).await.is_ok() {
        return ToolRun::Interrupted;
    }
    ToolRun::Completed(ValidationOutcome::exception(
        path,
        METHOD_EXCEPTION,
        describe_exit(tool.name(), status),
    ))
}

#[cfg(unix)]
fn killed_by_interrupt(status: ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    const SIGINT: i32 = 2;
    const SIGTERM: i32 = 15;
    matches!(status.signal(), Some(SIGINT | SIGTERM))
}

#[cfg(not(unix))]
fn killed_by_interrupt(_status: ExitStatus) -> bool {
    false
}

async fn read_stream<R: AsyncRead + Unpin>(stream: Option<R>) -> Vec<u8> {
    let mut buffer = Vec::new();
    if let Some(mut stream) = stream {
        // A read error keeps whatever arrived before it
        let _ = stream.read_to_end(&mut buffer).await;
    }
    buffer
}

/// Decide the verdict of a finished tool run.
fn classify(
    tool: &SelectedTool,
    path: &Path,
    status: ExitStatus,
    stdout: &[u8],
    stderr: &[u8],
) -> ValidationOutcome {
    let diagnostics = decode_output(stderr);

    if status.success() {
        if diagnostics.is_empty() {
            return ValidationOutcome::ok(path, tool.name());
        }
        return match tool.spec.diagnostics {
            DiagnosticPolicy::ErrorChannel => ValidationOutcome::fail(path, tool.name(), diagnostics),
            DiagnosticPolicy::ExitCode => ValidationOutcome::warn(path, tool.name(), diagnostics),
        };
    }

    let message = if !diagnostics.is_empty() {
        diagnostics
    } else {
        let output = decode_output(stdout);
        if output.is_empty() {
            describe_exit(tool.name(), status)
        } else {
            output
        }
    };
    ValidationOutcome::fail(path, tool.name(), message)
}

fn describe_exit(tool: &str, status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("{tool} exited with code {code}");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("{tool} terminated by signal {signal}");
        }
    }
    format!("{tool} terminated abnormally")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::tools::ToolSpec;
    use std::os::unix::fs::PermissionsExt;
    use std::os::unix::process::ExitStatusExt;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn selected(spec: ToolSpec, path: PathBuf) -> SelectedTool {
        SelectedTool { spec, path }
    }

    fn target(dir: &Path, name: &str) -> Target {
        let path = dir.join(name);
        std::fs::write(&path, b"audio").unwrap();
        Target::new(path)
    }

    async fn finished(adapter: &ValidatorAdapter, target: &Target) -> ValidationOutcome {
        match adapter.validate(target, &CancellationToken::new()).await {
            JobResult::Finished(outcome) => outcome,
            JobResult::Interrupted => panic!("job was not expected to be interrupted"),
        }
    }

    #[test]
    fn test_classify_error_channel_zero_exit_with_diagnostics_fails() {
        let tool = selected(ToolSpec::ffmpeg(), PathBuf::from("/usr/bin/ffmpeg"));
        let outcome = classify(
            &tool,
            Path::new("/m/a.flac"),
            ExitStatus::from_raw(0),
            b"",
            b"[flac] invalid residual\n",
        );
        assert_eq!(outcome.status, ValidationStatus::Fail);
        assert_eq!(outcome.method, "ffmpeg");
        assert_eq!(outcome.message, "[flac] invalid residual");
    }

    #[test]
    fn test_classify_exit_code_zero_exit_with_diagnostics_warns() {
        let tool = selected(ToolSpec::flac(), PathBuf::from("/usr/bin/flac"));
        let outcome = classify(
            &tool,
            Path::new("/m/a.flac"),
            ExitStatus::from_raw(0),
            b"",
            b"WARNING: skipped ID3v2 tag",
        );
        assert_eq!(outcome.status, ValidationStatus::Warn);
        assert_eq!(outcome.message, "WARNING: skipped ID3v2 tag");
    }

    #[test]
    fn test_classify_message_selection() {
        let tool = selected(ToolSpec::flac(), PathBuf::from("/usr/bin/flac"));
        // Exit code 2 is encoded in the high byte of a raw wait status
        let failed = ExitStatus::from_raw(2 << 8);

        let outcome = classify(&tool, Path::new("a"), failed, b"stdout text", b"");
        assert_eq!(outcome.message, "stdout text");

        let outcome = classify(&tool, Path::new("a"), failed, b"", b"");
        assert_eq!(outcome.message, "flac exited with code 2");

        let outcome = classify(&tool, Path::new("a"), ExitStatus::from_raw(9), b"", b"");
        assert_eq!(outcome.message, "flac terminated by signal 9");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_passing_tool() {
        let dir = TempDir::new().unwrap();
        let tool = script(dir.path(), "flac", "exit 0");
        let adapter = ValidatorAdapter::new(vec![selected(ToolSpec::flac(), tool)]);

        let outcome = finished(&adapter, &target(dir.path(), "a.flac")).await;
        assert_eq!(outcome.status, ValidationStatus::Ok);
        assert_eq!(outcome.method, "flac");
        assert!(outcome.message.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failing_tool_reports_stderr() {
        let dir = TempDir::new().unwrap();
        let tool = script(
            dir.path(),
            "flac",
            "echo \"$3: ERROR while decoding data\" >&2\nexit 1",
        );
        let adapter = ValidatorAdapter::new(vec![selected(ToolSpec::flac(), tool)]);
        let target = target(dir.path(), "b.flac");

        let outcome = finished(&adapter, &target).await;
        assert_eq!(outcome.status, ValidationStatus::Fail);
        assert_eq!(
            outcome.message,
            format!("{}: ERROR while decoding data", target.path().display())
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_vanished_tool_falls_through_chain() {
        let dir = TempDir::new().unwrap();
        let ffmpeg = script(dir.path(), "ffmpeg", "exit 0");
        let adapter = ValidatorAdapter::new(vec![
            selected(ToolSpec::flac(), dir.path().join("gone-flac")),
            selected(ToolSpec::ffmpeg(), ffmpeg),
        ]);

        let outcome = finished(&adapter, &target(dir.path(), "a.flac")).await;
        assert_eq!(outcome.status, ValidationStatus::Ok);
        assert_eq!(outcome.method, "ffmpeg");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_exhausted_chain_is_exception_none() {
        let dir = TempDir::new().unwrap();
        let adapter = ValidatorAdapter::new(vec![selected(
            ToolSpec::flac(),
            dir.path().join("gone-flac"),
        )]);

        let outcome = finished(&adapter, &target(dir.path(), "a.flac")).await;
        assert_eq!(outcome.status, ValidationStatus::Exception);
        assert_eq!(outcome.method, METHOD_NONE);
        assert_eq!(outcome.message, "no validator tool available");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unspawnable_tool_is_exception() {
        let dir = TempDir::new().unwrap();
        // Present but not executable
        let tool = dir.path().join("flac");
        std::fs::write(&tool, "not a program").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o644)).unwrap();
        let adapter = ValidatorAdapter::new(vec![selected(ToolSpec::flac(), tool)]);

        let outcome = finished(&adapter, &target(dir.path(), "a.flac")).await;
        assert_eq!(outcome.status, ValidationStatus::Exception);
        assert_eq!(outcome.method, METHOD_EXCEPTION);
        assert!(outcome.message.starts_with("failed to start flac"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_confirm_failures_uses_next_verdict() {
        let dir = TempDir::new().unwrap();
        let ffmpeg = script(dir.path(), "ffmpeg", "echo 'decode error' >&2\nexit 0");
        let flac = script(dir.path(), "flac", "exit 0");
        let chain = vec![
            selected(ToolSpec::ffmpeg(), ffmpeg),
            selected(ToolSpec::flac(), flac),
        ];
        let target = target(dir.path(), "a.flac");

        let plain = ValidatorAdapter::new(chain.clone());
        let outcome = finished(&plain, &target).await;
        assert_eq!(outcome.status, ValidationStatus::Fail);
        assert_eq!(outcome.method, "ffmpeg");

        let confirming = ValidatorAdapter::new(chain).with_confirm_failures(true);
        let outcome = finished(&confirming, &target).await;
        assert_eq!(outcome.status, ValidationStatus::Ok);
        assert_eq!(outcome.method, "flac");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_timeout_kills_tool() {
        let dir = TempDir::new().unwrap();
        let pid_file = dir.path().join("pid");
        let tool = script(
            dir.path(),
            "flac",
            &format!("echo $$ > '{}'\nexec sleep 30", pid_file.display()),
        );
        let adapter = ValidatorAdapter::new(vec![selected(ToolSpec::flac(), tool)])
            .with_timeout(Some(Duration::from_secs(1)));

        let started = std::time::Instant::now();
        let outcome = finished(&adapter, &target(dir.path(), "slow.flac")).await;
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(outcome.status, ValidationStatus::Fail);
        assert_eq!(outcome.message, "timed out after 1s");

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let alive = std::process::Command::new("kill")
            .args(["-0", pid.trim()])
            .status()
            .unwrap();
        assert!(!alive.success(), "timed out tool process survived");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancellation_interrupts_running_tool() {
        let dir = TempDir::new().unwrap();
        let tool = script(dir.path(), "flac", "exec sleep 30");
        let adapter = ValidatorAdapter::new(vec![selected(ToolSpec::flac(), tool)]);
        let target = target(dir.path(), "slow.flac");
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let result = adapter.validate(&target, &token).await;
        assert_eq!(result, JobResult::Interrupted);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test(flavor = "multi_thread")]
    async fn test_tool_runs_in_its_own_process_group() {
        let dir = TempDir::new().unwrap();
        let tool = script(
            dir.path(),
            "flac",
            "read -r _ _ _ _ pgrp _ < /proc/$$/stat\n\
             [ \"$pgrp\" = \"$$\" ] && exit 0\n\
             echo \"shares group $pgrp\" >&2\nexit 1",
        );
        let adapter = ValidatorAdapter::new(vec![selected(ToolSpec::flac(), tool)]);

        let outcome = finished(&adapter, &target(dir.path(), "a.flac")).await;
        assert_eq!(outcome.status, ValidationStatus::Ok, "{}", outcome.message);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_signalled_tool_during_cancellation_records_nothing() {
        let dir = TempDir::new().unwrap();
        let tool = script(dir.path(), "flac", "kill -TERM $$\nsleep 5");
        let adapter = ValidatorAdapter::new(vec![selected(ToolSpec::flac(), tool)]);
        let token = CancellationToken::new();

        // The tool dies before the session notices the interrupt
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let result = adapter.validate(&target(dir.path(), "a.flac"), &token).await;
        assert_eq!(result, JobResult::Interrupted);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_signalled_tool_without_cancellation_is_exception() {
        let dir = TempDir::new().unwrap();
        let tool = script(dir.path(), "flac", "kill -TERM $$\nsleep 5");
        let adapter = ValidatorAdapter::new(vec![selected(ToolSpec::flac(), tool)]);

        let outcome = finished(&adapter, &target(dir.path(), "a.flac")).await;
        assert_eq!(outcome.status, ValidationStatus::Exception);
        assert_eq!(outcome.method, METHOD_EXCEPTION);
        assert_eq!(outcome.message, "flac terminated by signal 15");
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_nothing() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("ran");
        let tool = script(dir.path(), "flac", &format!("touch '{}'", marker.display()));
        let adapter = ValidatorAdapter::new(vec![selected(ToolSpec::flac(), tool)]);
        let token = CancellationToken::new();
        token.cancel();

        let result = adapter.validate(&target(dir.path(), "a.flac"), &token).await;
        assert_eq!(result, JobResult::Interrupted);
        assert!(!marker.exists());
    }
}
