//! Subprocess execution with first-class kill-on-deadline.
//!
//! Every external invocation in the shutdown sequence goes through
//! [`CommandRunner`], so stages stay mock-injectable and no child can
//! outlive its wall-clock deadline.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::ExecError;

/// Captured result of one finished invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdOutput {
    pub success: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Non-empty, trimmed stdout lines.
    pub fn lines(&self) -> Vec<String> {
        self.stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect()
    }
}

/// Trait for running external commands. Enables mock injection for
/// testing; the orchestrator and every stage are generic over it.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program args…` under the given wall-clock deadline.
    /// The child is killed when the deadline elapses.
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CmdOutput, ExecError>;
}

/// Build an owned argument vector from borrowed pieces.
pub fn argv<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

/// Real runner using `tokio::process::Command`.
///
/// Timeout expiry kills the child automatically (`Command::output()`
/// kill-on-drop semantics) and is reported as [`ExecError::TimedOut`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CmdOutput, ExecError> {
        let mut cmd = Command::new(program);
        cmd.args(args);

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(io_err)) => {
                return Err(ExecError::Io {
                    description: program.to_string(),
                    source: io_err,
                });
            }
            Err(_elapsed) => {
                return Err(ExecError::TimedOut {
                    description: program.to_string(),
                    secs: timeout.as_secs(),
                });
            }
        };

        Ok(CmdOutput {
            success: output.status.success(),
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

// ─── Tests ────────────────────────────────────────────────────────
