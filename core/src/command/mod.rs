//! Command Runner: bounded concurrent execution of external tools.
//!
//! Grounded on the teacher's `run_validation` (`tokio::process::Command` +
//! `tokio::time::timeout`) and its scheduler's semaphore-bounded concurrency,
//! adapted from loop concurrency to subprocess concurrency: a single
//! `tokio::sync::Semaphore` caps the number of live children across every
//! caller (LLM CLI adapter, Executor step handlers, Protocol Integration
//! stages) rather than the teacher's full priority scheduler, since the spec
//! only asks for a fixed bound.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const DEFAULT_MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_MAX_CONCURRENT: usize = 8;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command `{program}` timed out after {timeout_secs}s")]
    Timeout { program: String, timeout_secs: u64 },

    #[error("command `{program}` exited with status {status}: {stderr}")]
    Failed {
        program: String,
        status: i32,
        stderr: String,
        stdout: String,
    },

    #[error("cancelled")]
    Cancelled,
}

impl CommandError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Spawn { .. } | Self::Failed { .. } => "CommandFailed",
            Self::Timeout { .. } => "CommandTimeout",
            Self::Cancelled => "Cancelled",
        }
    }
}

/// Captured output of a completed command. Populated even on failure so
/// callers can inspect partial output (the spec's "stdout is returned
/// regardless" contract); on failure the same bytes are also carried on
/// `CommandError::Failed`.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: Option<i32>,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
}

impl CommandOutput {
    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_string(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

enum Outcome {
    Exited(std::process::ExitStatus),
    TimedOut,
    Cancelled,
}

pub struct CommandRunner {
    semaphore: Arc<Semaphore>,
    default_timeout: Duration,
    max_output_bytes: usize,
}

impl CommandRunner {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            default_timeout: DEFAULT_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    pub fn with_limits(max_concurrent: usize, default_timeout: Duration, max_output_bytes: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            default_timeout,
            max_output_bytes,
        }
    }

    /// Run `program args` in `working_dir`, optionally piping `stdin`.
    /// Concurrency is bounded by the runner's semaphore; a timeout (caller's
    /// override, else the runner's default) and `cancel` both abort the
    /// child. Output past `max_output_bytes` per stream is dropped silently
    /// so the child is never blocked on a full pipe.
    pub async fn run(
        &self,
        working_dir: &Path,
        program: &str,
        args: &[String],
        stdin: Option<&[u8]>,
        timeout: Option<Duration>,
        cancel: CancellationToken,
    ) -> Result<CommandOutput, CommandError> {
        let _permit = self.semaphore.acquire().await.expect("semaphore is never closed");
        let effective_timeout = timeout.unwrap_or(self.default_timeout);
        debug!(program, ?working_dir, timeout_secs = effective_timeout.as_secs(), "CommandRunner::run: spawning");

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(working_dir)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|source| CommandError::Spawn {
            program: program.to_string(),
            source,
        })?;

        if let Some(input) = stdin {
            let mut stdin_handle = child.stdin.take().expect("stdin piped when stdin is Some");
            let input = input.to_vec();
            tokio::spawn(async move {
                let _ = stdin_handle.write_all(&input).await;
            });
        }

        let stdout = child.stdout.take().expect("stdout always piped");
        let stderr = child.stderr.take().expect("stderr always piped");
        let cap = self.max_output_bytes;
        let stdout_task = tokio::spawn(drain_capped(stdout, cap));
        let stderr_task = tokio::spawn(drain_capped(stderr, cap));

        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status.map_err(|source| CommandError::Spawn { program: program.to_string(), source })?),
            _ = tokio::time::sleep(effective_timeout) => Outcome::TimedOut,
            _ = cancel.cancelled() => Outcome::Cancelled,
        };

        if matches!(outcome, Outcome::TimedOut | Outcome::Cancelled) {
            warn!(program, "CommandRunner::run: killing child after timeout or cancellation");
            let _ = child.kill().await;
            let _ = child.wait().await;
            stdout_task.abort();
            stderr_task.abort();
            return Err(match outcome {
                Outcome::TimedOut => CommandError::Timeout {
                    program: program.to_string(),
                    timeout_secs: effective_timeout.as_secs(),
                },
                Outcome::Cancelled => CommandError::Cancelled,
                Outcome::Exited(_) => unreachable!(),
            });
        }
        let Outcome::Exited(status) = outcome else { unreachable!() };

        let (stdout_buf, stdout_truncated) = stdout_task.await.unwrap_or_default();
        let (stderr_buf, stderr_truncated) = stderr_task.await.unwrap_or_default();
        let exit_code = status.code();

        if !status.success() {
            return Err(CommandError::Failed {
                program: program.to_string(),
                status: exit_code.unwrap_or(-1),
                stderr: String::from_utf8_lossy(&stderr_buf).into_owned(),
                stdout: String::from_utf8_lossy(&stdout_buf).into_owned(),
            });
        }

        Ok(CommandOutput {
            stdout: stdout_buf,
            stderr: stderr_buf,
            exit_code,
            stdout_truncated,
            stderr_truncated,
        })
    }

    /// `which`-style availability probe: attempt `program --version` and
    /// report whether the process could be spawned at all, the same check
    /// the teacher's `ToolCheck::check` performs for its required-tools banner.
    pub async fn is_available(program: &str) -> bool {
        tokio::process::Command::new(program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .is_ok()
    }
}

/// Read `reader` to EOF, keeping at most `cap` bytes and discarding the rest
/// so the child's pipe never fills up and blocks it.
async fn drain_capped(mut reader: impl AsyncRead + Unpin, cap: usize) -> (Vec<u8>, bool) {
    let mut buf = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if buf.len() < cap {
                    let remaining = cap - buf.len();
                    let take = remaining.min(n);
                    buf.extend_from_slice(&chunk[..take]);
                    if take < n {
                        truncated = true;
                    }
                } else {
                    truncated = true;
                }
            }
            Err(_) => break,
        }
    }
    (buf, truncated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner() -> CommandRunner {
        CommandRunner::new(DEFAULT_MAX_CONCURRENT)
    }

    #[tokio::test]
    async fn test_run_captures_stdout() {
        let out = runner()
            .run(
                Path::new("."),
                "sh",
                &["-c".to_string(), "echo hello".to_string()],
                None,
                None,
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(out.stdout_string().trim(), "hello");
        assert_eq!(out.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_nonzero_exit_carries_stdout_and_stderr() {
        let err = runner()
            .run(
                Path::new("."),
                "sh",
                &["-c".to_string(), "echo partial; echo oops 1>&2; exit 3".to_string()],
                None,
                None,
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        match err {
            CommandError::Failed { status, stderr, stdout, .. } => {
                assert_eq!(status, 3);
                assert!(stderr.contains("oops"));
                assert!(stdout.contains("partial"));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_enforced() {
        let err = runner()
            .run(
                Path::new("."),
                "sh",
                &["-c".to_string(), "sleep 5".to_string()],
                None,
                Some(Duration::from_millis(50)),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_command() {
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel_clone.cancel();
        });
        let err = runner()
            .run(
                Path::new("."),
                "sh",
                &["-c".to_string(), "sleep 5".to_string()],
                None,
                None,
                cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Cancelled));
    }

    #[tokio::test]
    async fn test_stdin_is_piped_through() {
        let out = runner()
            .run(
                Path::new("."),
                "cat",
                &[],
                Some(b"from stdin"),
                None,
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(out.stdout_string(), "from stdin");
    }

    #[tokio::test]
    async fn test_output_beyond_cap_is_truncated_not_blocking() {
        let small = CommandRunner::with_limits(DEFAULT_MAX_CONCURRENT, DEFAULT_TIMEOUT, 4);
        let out = small
            .run(
                Path::new("."),
                "sh",
                &["-c".to_string(), "echo 0123456789".to_string()],
                None,
                None,
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(out.stdout.len(), 4);
        assert!(out.stdout_truncated);
    }

    #[tokio::test]
    async fn test_is_available_reports_missing_program() {
        assert!(!CommandRunner::is_available("definitely-not-a-real-binary-xyz").await);
    }
}
