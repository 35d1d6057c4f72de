//! Bounded invocation of external media tools.

use std::ffi::OsStr;
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

/// Runs one external program to completion, killing it if it outlives `timeout`.
#[derive(Debug, Clone)]
pub struct ToolRunner {
    program: String,
    timeout: Duration,
}

impl ToolRunner {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Run the program with `args`, capturing stdout and stderr.
    ///
    /// A non-zero exit is reported as [`ToolError::NonZeroExit`] with the
    /// captured stderr so callers can log it.
    pub async fn run<I, S>(&self, args: I) -> Result<Output, ToolError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(program = %self.program, "Spawning external tool");

        let child = cmd.spawn().map_err(ToolError::Spawn)?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(ToolError::Io)?,
            Err(_) => {
                warn!(
                    program = %self.program,
                    timeout_secs = self.timeout.as_secs(),
                    "External tool timed out, killing process"
                );
                return Err(ToolError::Timeout(self.timeout));
            }
        };

        if !output.status.success() {
            return Err(ToolError::NonZeroExit {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Failed to spawn tool: {0}")]
    Spawn(std::io::Error),

    #[error("I/O error while waiting for tool: {0}")]
    Io(std::io::Error),

    #[error("Tool timed out after {0:?}")]
    Timeout(Duration),

    #[error("Tool exited with status {code:?}")]
    NonZeroExit { code: Option<i32>, stderr: String },
}
