//! UpscRunner trait and the real `upsc` subprocess executor.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::NutError;

/// Trait for querying the NUT server. Enables mock injection for testing.
#[async_trait]
pub trait UpscRunner: Send + Sync {
    /// Run `upsc <target>` under the given wall-clock deadline and
    /// return its raw standard output.
    async fn query(&self, target: &str, deadline: Duration) -> Result<String, NutError>;
}

/// Real executor invoking the external `upsc` binary.
///
/// The child is killed when the deadline elapses
/// (`Command::output()` kill-on-drop semantics).
pub struct UpscExecutor {
    upsc_bin: String,
}

impl UpscExecutor {
    pub fn new(upsc_bin: impl Into<String>) -> Self {
        Self {
            upsc_bin: upsc_bin.into(),
        }
    }
}

impl Default for UpscExecutor {
    fn default() -> Self {
        Self::new("upsc")
    }
}

#[async_trait]
impl UpscRunner for UpscExecutor {
    async fn query(&self, target: &str, deadline: Duration) -> Result<String, NutError> {
        let mut cmd = Command::new(&self.upsc_bin);
        cmd.arg(target);

        let output = tokio::time::timeout(deadline, cmd.output())
            .await
            .map_err(|_elapsed| NutError::TimedOut(deadline.as_secs()))??;

        if !output.status.success() {
            return Err(NutError::CommandFailed {
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if stdout.trim().is_empty() {
            return Err(NutError::EmptyOutput);
        }
        Ok(stdout)
    }
}
