//! Sandboxed execution of user programs.
//!
//! The runner spawns a `python3` child with kernel resource limits installed
//! pre-exec, feeds an optional stdin string, drains stdout and stderr on
//! dedicated reader threads, enforces a wall-clock deadline independently of
//! the CPU cap, and classifies the termination into a tagged
//! [`ExecutionOutcome`]. Control flow stays in return values; the handler
//! matches on the classification rather than catching errors.

mod limits;
mod output;

use async_trait::async_trait;
use camino::Utf8PathBuf;
use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{info_span, warn};
use wait_timeout::ChildExt;

pub use self::limits::ResourceLimits;
use self::output::truncate_output;
use crate::observability::LOG_TARGET;

/// Interpreter hosted by this worker.
pub const INTERPRETER: &str = "python3";

/// The runner's verdict on one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Exit code zero.
    Ok,
    /// Non-zero exit from the user's program.
    UserError,
    /// The wall-clock deadline elapsed.
    Timeout,
    /// The worker failed to run the program at all.
    Internal,
}

impl Classification {
    /// Stable name for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::UserError => "user_error",
            Self::Timeout => "timeout",
            Self::Internal => "internal",
        }
    }
}

/// Tagged result of one sandboxed execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// The runner's verdict.
    pub classification: Classification,
    /// Captured stdout; empty when nothing was captured.
    pub stdout: String,
    /// Captured stderr, when any was produced.
    pub stderr: Option<String>,
    /// Diagnostic text, clipped to a bounded length; `None` when the run
    /// succeeded or a non-zero exit produced nothing to report (the handler
    /// records a generic diagnostic for the latter).
    pub error: Option<String>,
}

impl ExecutionOutcome {
    /// Successful run with its captured stdout.
    #[must_use]
    pub const fn ok(stdout: String) -> Self {
        Self {
            classification: Classification::Ok,
            stdout,
            stderr: None,
            error: None,
        }
    }

    /// Non-zero exit; the diagnostic is stderr, falling back to stdout when
    /// stderr is empty, clipped to a bounded length. A silent failure (both
    /// streams empty) carries no diagnostic.
    #[must_use]
    pub fn user_error(stdout: String, stderr: String) -> Self {
        let source = if stderr.is_empty() {
            stdout.as_str()
        } else {
            stderr.as_str()
        };
        let error = if source.is_empty() {
            None
        } else {
            Some(truncate_output(source))
        };
        Self {
            classification: Classification::UserError,
            stdout,
            stderr: Some(stderr),
            error,
        }
    }

    /// Wall-clock expiry after `limit_secs` seconds.
    #[must_use]
    pub fn timeout(limit_secs: u64) -> Self {
        Self {
            classification: Classification::Timeout,
            stdout: String::new(),
            stderr: None,
            error: Some(format!("Execution timed out after {limit_secs} seconds.")),
        }
    }

    /// Worker-side failure with a sanitised diagnostic. The message must not
    /// contain host paths or credentials.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            classification: Classification::Internal,
            stdout: String::new(),
            stderr: None,
            error: Some(message.into()),
        }
    }
}

/// What to execute.
#[derive(Debug, Clone)]
pub enum ExecSource {
    /// Inline source passed to the interpreter with `-c`.
    Code {
        /// The program text.
        source: String,
    },
    /// A script path run with the workspace root as working directory.
    Script {
        /// Entrypoint path relative to the workspace root.
        entrypoint: Utf8PathBuf,
        /// Workspace root the interpreter runs in.
        workdir: Utf8PathBuf,
    },
}

/// One execution request.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// What to execute.
    pub source: ExecSource,
    /// Single string piped to the child's standard input.
    pub input: Option<String>,
    /// Wall-clock deadline enforced by the parent.
    pub timeout: Duration,
    /// Kernel limits installed in the child.
    pub limits: ResourceLimits,
}

/// Async seam over the sandbox so the task handler can be exercised with a
/// scripted runner in tests.
#[async_trait]
pub trait CodeRunner: Send + Sync {
    /// Runs one request to completion and classifies the termination.
    async fn run(&self, request: ExecRequest) -> ExecutionOutcome;
}

/// Production runner: executes the blocking supervisor on the blocking
/// thread pool. Re-entrant across tasks provided distinct working
/// directories.
#[derive(Debug, Default, Clone, Copy)]
pub struct SandboxRunner;

#[async_trait]
impl CodeRunner for SandboxRunner {
    async fn run(&self, request: ExecRequest) -> ExecutionOutcome {
        match tokio::task::spawn_blocking(move || run_blocking(&request)).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(target: LOG_TARGET, error = %err, "sandbox task aborted");
                ExecutionOutcome::internal("Internal worker error: sandbox task aborted.")
            }
        }
    }
}

/// Supervises one child process to termination.
///
/// Blocking: call from a dedicated thread or the blocking pool.
#[must_use]
pub fn run_blocking(request: &ExecRequest) -> ExecutionOutcome {
    let span = info_span!(
        target: LOG_TARGET,
        "sandbox_run",
        timeout_secs = request.timeout.as_secs()
    );
    let _entered = span.enter();

    let mut command = build_command(request);
    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            warn!(target: LOG_TARGET, error = %err, "failed to spawn interpreter");
            return ExecutionOutcome::internal(
                "Internal worker error: failed to launch the interpreter.",
            );
        }
    };

    let stdin_feeder = feed_stdin(&mut child, request.input.clone());
    let stdout_reader = drain(child.stdout.take());
    let stderr_reader = drain(child.stderr.take());

    let outcome = match child.wait_timeout(request.timeout) {
        Ok(Some(status)) => {
            let stdout = collect(stdout_reader);
            let stderr = collect(stderr_reader);
            classify_exit(status, stdout, stderr)
        }
        Ok(None) => {
            kill_process_group(&mut child);
            let _ = child.wait();
            drop(collect(stdout_reader));
            drop(collect(stderr_reader));
            warn!(
                target: LOG_TARGET,
                timeout_secs = request.timeout.as_secs(),
                "execution timed out"
            );
            ExecutionOutcome::timeout(request.timeout.as_secs())
        }
        Err(err) => {
            let _ = child.kill();
            let _ = child.wait();
            warn!(target: LOG_TARGET, error = %err, "failed waiting for the interpreter");
            ExecutionOutcome::internal(
                "Internal worker error: failed waiting for the interpreter.",
            )
        }
    };

    if let Some(feeder) = stdin_feeder {
        let _ = feeder.join();
    }
    outcome
}

fn build_command(request: &ExecRequest) -> Command {
    let mut command = Command::new(INTERPRETER);
    match &request.source {
        ExecSource::Code { source } => {
            command.arg("-c").arg(source);
        }
        ExecSource::Script { entrypoint, workdir } => {
            command.arg(entrypoint.as_std_path());
            command.current_dir(workdir.as_std_path());
        }
    }
    command
        .stdin(if request.input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt as _;
        let limits = request.limits;
        // Installed post-fork, pre-exec: the parent is unaffected.
        unsafe {
            command.pre_exec(move || limits.install());
        }
    }
    command
}

/// Writes the input string to the child's stdin on a helper thread, then
/// closes the pipe. A separate thread avoids deadlocking against a child
/// that fills its output pipes before reading stdin.
fn feed_stdin(child: &mut Child, input: Option<String>) -> Option<JoinHandle<()>> {
    let data = input?;
    let mut stdin = child.stdin.take()?;
    Some(thread::spawn(move || {
        let _ = stdin.write_all(data.as_bytes());
    }))
}

/// Drains a child pipe to the end on a helper thread so the child can never
/// block on a full pipe while the parent waits.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    let mut pipe = pipe?;
    Some(thread::spawn(move || {
        let mut captured = Vec::new();
        let _ = pipe.read_to_end(&mut captured);
        captured
    }))
}

fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> String {
    reader
        .and_then(|handle| handle.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

fn classify_exit(status: ExitStatus, stdout: String, stderr: String) -> ExecutionOutcome {
    if status.success() {
        ExecutionOutcome::ok(stdout)
    } else {
        warn!(
            target: LOG_TARGET,
            code = status.code(),
            "user program exited unsuccessfully"
        );
        ExecutionOutcome::user_error(stdout, stderr)
    }
}

/// Kills the child's whole process group. The child called `setsid`
/// pre-exec, so its process group id equals its pid.
#[cfg(unix)]
fn kill_process_group(child: &mut Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let killed = i32::try_from(child.id())
        .ok()
        .and_then(|pid| killpg(Pid::from_raw(pid), Signal::SIGKILL).ok());
    if killed.is_none() {
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) {
    let _ = child.kill();
}
