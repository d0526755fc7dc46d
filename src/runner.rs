//! External command invocation with a hard timeout and bounded output
//! capture.
//!
//! Every converter and slicer subprocess goes through [CommandRunner], the
//! one place that knows about process lifetimes: a 10-minute kill timer,
//! per-stream capture caps, and the distinction between "the command
//! signaled failure" and "the command was killed".

use std::{path::Path, process::Stdio, time::Duration};

use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Hard ceiling on any single subprocess.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(600);

/// Per-stream capture cap; output past this point is drained and
/// discarded so the child never blocks on a full pipe.
pub const MAX_CAPTURE_BYTES: u64 = 10 * 1024 * 1024;

/// Captured output of a successful invocation.
#[derive(Debug)]
pub struct CommandOutput {
    /// Captured standard output, truncated at [MAX_CAPTURE_BYTES].
    pub stdout: String,

    /// Captured standard error, truncated at [MAX_CAPTURE_BYTES].
    pub stderr: String,
}

/// Failure of a subprocess invocation.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The process outlived [COMMAND_TIMEOUT] and was killed.
    #[error("command `{command}` timed out after {timeout_secs}s and was killed")]
    Timeout {
        /// The rendered command line.
        command: String,
        /// The timeout that expired, in seconds.
        timeout_secs: u64,
    },

    /// The process exited non-zero. `output` carries stderr, or stdout
    /// when stderr was empty.
    #[error("command `{command}` failed: {output}")]
    Failed {
        /// The rendered command line.
        command: String,
        /// Merged diagnostic text.
        output: String,
    },

    /// The process could not be spawned at all.
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        /// The rendered command line.
        command: String,
        /// The underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// Reading the child's pipes or waiting on it failed.
    #[error("i/o failure while running `{command}`: {source}")]
    Io {
        /// The rendered command line.
        command: String,
        /// The underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
}

impl RunError {
    /// True when the failure was the kill timer, not the command itself.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Runner for external converters and the slicer.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    timeout: Duration,
    echo_commands: bool,
}

impl CommandRunner {
    /// Create a runner. `echo_commands` gates debug logging of full
    /// command lines.
    pub fn new(echo_commands: bool) -> Self {
        Self {
            timeout: COMMAND_TIMEOUT,
            echo_commands,
        }
    }

    /// Override the timeout; used by tests.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run `program` with `args`, capturing both streams. Returns the
    /// captured output on exit code zero.
    pub async fn run(&self, program: &Path, args: &[&str]) -> Result<CommandOutput, RunError> {
        let rendered = render(program, args);
        if self.echo_commands {
            tracing::debug!(command = %rendered, "spawning subprocess");
        }

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Give the child its own process group so the kill timer takes
        // the whole tree down with it, not just the leader.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| RunError::Spawn {
            command: rendered.clone(),
            source,
        })?;

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        let wait = async {
            let (stdout, stderr) = tokio::join!(read_capped(stdout_pipe), read_capped(stderr_pipe));
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, stdout?, stderr?))
        };

        // On expiry the future is dropped, which drops the child and
        // (kill_on_drop) sends it SIGKILL.
        let (status, stdout, stderr) = match tokio::time::timeout(self.timeout, wait).await {
            Err(_) => {
                tracing::warn!(command = %rendered, "subprocess killed by timeout");
                return Err(RunError::Timeout {
                    command: rendered,
                    timeout_secs: self.timeout.as_secs(),
                });
            }
            Ok(Err(source)) => {
                return Err(RunError::Io {
                    command: rendered,
                    source,
                });
            }
            Ok(Ok(parts)) => parts,
        };

        if !status.success() {
            let output = if stderr.trim().is_empty() { stdout } else { stderr };
            return Err(RunError::Failed {
                command: rendered,
                output: output.trim().to_string(),
            });
        }

        Ok(CommandOutput { stdout, stderr })
    }
}

/// Read a child stream up to [MAX_CAPTURE_BYTES], then drain the rest so
/// the child can make progress. Truncation is not an error.
async fn read_capped<R>(pipe: Option<R>) -> Result<String, std::io::Error>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(pipe) = pipe else {
        return Ok(String::new());
    };
    let mut capped = pipe.take(MAX_CAPTURE_BYTES);
    let mut buf = Vec::new();
    capped.read_to_end(&mut buf).await?;
    tokio::io::copy(&mut capped.into_inner(), &mut tokio::io::sink()).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn render(program: &Path, args: &[&str]) -> String {
    let mut rendered = program.display().to_string();
    for arg in args {
        rendered.push(' ');
        rendered.push_str(arg);
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sh() -> PathBuf {
        PathBuf::from("/bin/sh")
    }

    #[tokio::test]
    async fn captures_stdout_on_success() {
        let runner = CommandRunner::new(false);
        let output = runner.run(&sh(), &["-c", "echo hello"]).await.unwrap();
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn non_zero_exit_surfaces_stderr() {
        let runner = CommandRunner::new(false);
        let err = runner
            .run(&sh(), &["-c", "echo oops >&2; exit 3"])
            .await
            .unwrap_err();
        match err {
            RunError::Failed { output, .. } => assert_eq!(output, "oops"),
            other => panic!("expected Failed, got {:?}", other),
        }
        assert!(!RunError::Failed {
            command: String::new(),
            output: String::new()
        }
        .is_timeout());
    }

    #[tokio::test]
    async fn falls_back_to_stdout_when_stderr_is_empty() {
        let runner = CommandRunner::new(false);
        let err = runner
            .run(&sh(), &["-c", "echo diagnostic; exit 1"])
            .await
            .unwrap_err();
        match err {
            RunError::Failed { output, .. } => assert_eq!(output, "diagnostic"),
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn timeout_kills_and_is_distinguishable() {
        let runner = CommandRunner::new(false).with_timeout(Duration::from_millis(100));
        let err = runner.run(&sh(), &["-c", "sleep 30"]).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let runner = CommandRunner::new(false);
        let err = runner
            .run(Path::new("/nonexistent/converter"), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Spawn { .. }));
    }
}
