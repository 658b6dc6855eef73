// SPDX-License-Identifier: MIT OR Apache-2.0
//! Blocking subprocess runner with timeout, cancellation, and progress.
//!
//! Generators run for many seconds; the runner polls the child on a short
//! interval, streams stdout+stderr into the per-modality log file, emits
//! monotonically non-decreasing wall-time progress through the reporter
//! roughly every 1.5 s, and kills the child on timeout or cancellation.

use crate::StageReporter;
use mpl_error::{AdapterError, ErrorCode};
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// Child poll interval.
const POLL_PERIOD: Duration = Duration::from_millis(100);
/// Cadence of wall-time progress reports.
const PROGRESS_PERIOD: Duration = Duration::from_millis(1500);
/// How much of the log tail is scanned for failure signatures.
const LOG_TAIL_BYTES: u64 = 4096;

/// Argv, environment, and limits for one subprocess run.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Program and arguments; must be non-empty.
    pub argv: Vec<String>,
    /// Working directory, when the generator is cwd-sensitive.
    pub cwd: Option<PathBuf>,
    /// Extra environment variables on top of the inherited ones.
    pub env: Vec<(String, String)>,
    /// Kill the child after this long (`constraints.max_runtime_s`).
    pub timeout: Option<Duration>,
    /// Wall-time horizon used to shape the progress curve.
    pub expected_runtime_s: f64,
}

impl CommandSpec {
    /// Spec with defaults: no cwd, no env, no timeout, 30 s horizon.
    #[must_use]
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            argv,
            cwd: None,
            env: Vec::new(),
            timeout: None,
            expected_runtime_s: 30.0,
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Add an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// How a subprocess run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    /// Exit code, when the child exited on its own.
    pub exit_code: Option<i32>,
    /// The child was killed after exceeding the timeout.
    pub timed_out: bool,
    /// The child was killed because the job was canceled.
    pub canceled: bool,
}

impl RunOutcome {
    /// Whether the child exited normally with code 0.
    #[must_use]
    pub fn success(&self) -> bool {
        !self.timed_out && !self.canceled && self.exit_code == Some(0)
    }
}

/// Spawn the command with stdout+stderr appended to `log_path`, report
/// wall-time progress as `stage_name`, and wait for completion.
///
/// Progress is shaped as an asymptotic ramp over `expected_runtime_s` and
/// capped at 0.9 so the adapter's own finalize step owns the end of band.
///
/// # Errors
///
/// `E_IO_WRITE` when the log file cannot be opened, `E_MODEL_RUNTIME` when
/// the process cannot be spawned.
pub fn run_logged(
    spec: &CommandSpec,
    log_path: &Path,
    reporter: &dyn StageReporter,
    stage_name: &str,
    message: &str,
) -> Result<RunOutcome, AdapterError> {
    let Some(program) = spec.argv.first() else {
        return Err(AdapterError::new(
            ErrorCode::ValidationInput,
            "command argv must not be empty",
        ));
    };

    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            AdapterError::new(ErrorCode::IoWrite, "failed to create log directory")
                .with_detail("path", parent.display().to_string())
                .with_detail("error", e.to_string())
        })?;
    }
    let mut log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(|e| {
            AdapterError::new(ErrorCode::IoWrite, "failed to open subprocess log")
                .with_detail("path", log_path.display().to_string())
                .with_detail("error", e.to_string())
        })?;
    let _ = writeln!(log, "[cmd] {}", spec.argv.join(" "));

    let stdout = log.try_clone().map_err(|e| {
        AdapterError::new(ErrorCode::IoWrite, "failed to clone log handle")
            .with_detail("error", e.to_string())
    })?;
    let stderr = log.try_clone().map_err(|e| {
        AdapterError::new(ErrorCode::IoWrite, "failed to clone log handle")
            .with_detail("error", e.to_string())
    })?;

    let mut command = Command::new(program);
    command
        .args(&spec.argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr));
    if let Some(cwd) = &spec.cwd {
        command.current_dir(cwd);
    }
    for (key, value) in &spec.env {
        command.env(key, value);
    }

    let mut child = command.spawn().map_err(|e| {
        AdapterError::new(ErrorCode::ModelRuntime, "failed to spawn subprocess")
            .with_detail("program", program.clone())
            .with_detail("error", e.to_string())
    })?;

    let started = Instant::now();
    let mut last_report = Instant::now();
    let mut last_progress = 0.0_f64;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                let _ = writeln!(log, "[exit] {status}");
                return Ok(RunOutcome {
                    exit_code: status.code(),
                    timed_out: false,
                    canceled: false,
                });
            }
            Ok(None) => {}
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(AdapterError::new(
                    ErrorCode::ModelRuntime,
                    "failed to poll subprocess",
                )
                .with_detail("error", e.to_string()));
            }
        }

        if reporter.canceled() {
            let _ = writeln!(log, "[canceled] job canceled, terminating child");
            let _ = child.kill();
            let _ = child.wait();
            return Ok(RunOutcome {
                exit_code: None,
                timed_out: false,
                canceled: true,
            });
        }

        if let Some(timeout) = spec.timeout {
            if started.elapsed() >= timeout {
                let _ = writeln!(log, "[timeout] exceeded {:.0}s, terminating child", timeout.as_secs_f64());
                let _ = child.kill();
                let _ = child.wait();
                return Ok(RunOutcome {
                    exit_code: None,
                    timed_out: true,
                    canceled: false,
                });
            }
        }

        if last_report.elapsed() >= PROGRESS_PERIOD {
            last_report = Instant::now();
            let progress = wall_time_progress(started.elapsed(), spec.expected_runtime_s);
            if progress > last_progress {
                last_progress = progress;
                reporter.stage(stage_name, progress, message);
            }
        }

        std::thread::sleep(POLL_PERIOD);
    }
}

/// Asymptotic, monotonic progress estimate from elapsed wall time.
fn wall_time_progress(elapsed: Duration, expected_runtime_s: f64) -> f64 {
    let horizon = expected_runtime_s.max(1.0);
    let ratio = elapsed.as_secs_f64() / horizon;
    (0.05 + 0.85 * (ratio / (ratio + 1.0)) * 2.0).min(0.9)
}

/// Classify a failed [`RunOutcome`] into the error taxonomy.
///
/// Timeouts map to `E_TIMEOUT`; an out-of-memory signature in the log tail
/// maps to `E_MODEL_RUNTIME` with a remediation hint; anything else is a
/// plain `E_MODEL_RUNTIME`.  All are retryable.
#[must_use]
pub fn classify_failure(
    outcome: &RunOutcome,
    log_path: &Path,
    timeout: Option<Duration>,
    what: &str,
) -> AdapterError {
    if outcome.timed_out {
        let mut err = AdapterError::new(ErrorCode::Timeout, format!("{what} timed out"));
        if let Some(timeout) = timeout {
            err = err.with_detail("timeout_s", timeout.as_secs_f64());
        }
        return err.with_detail("log", log_path.display().to_string());
    }

    if log_tail_has_oom(log_path) {
        return AdapterError::new(ErrorCode::ModelRuntime, format!("{what} ran out of memory"))
            .with_detail("log", log_path.display().to_string())
            .with_detail(
                "suggestion",
                "reduce resolution, steps, or duration and retry",
            );
    }

    let mut err = AdapterError::new(ErrorCode::ModelRuntime, format!("{what} failed"));
    if let Some(code) = outcome.exit_code {
        err = err.with_detail("exit_code", code);
    }
    err.with_detail("log", log_path.display().to_string())
}

fn log_tail_has_oom(log_path: &Path) -> bool {
    let Ok(bytes) = std::fs::read(log_path) else {
        return false;
    };
    let start = bytes.len().saturating_sub(LOG_TAIL_BYTES as usize);
    let tail = String::from_utf8_lossy(&bytes[start..]).to_lowercase();
    tail.contains("out of memory") || tail.contains("cuda error: out of memory")
}
