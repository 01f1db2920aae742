//! External toolchain invocation.
//!
//! The dependency audit and code counting both shell out to tools that print
//! JSON. [`ToolCommand`] runs one such invocation with a timeout and turns
//! exit status, stderr noise and unparseable output into [`AuditError`]s.

pub mod composer;
pub mod scc;

use crate::error::AuditError;
use serde_json::Value;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

pub use composer::{ComposerAuditor, DependencyAudit};
pub use scc::{CodeVolume, SccCounter};

/// Captured output of a finished tool.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

/// One invocation of an external tool.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    reject_stderr: bool,
    accept_any_exit: bool,
}

impl ToolCommand {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            timeout: Duration::from_secs(300),
            reject_stderr: false,
            accept_any_exit: false,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Treat any output on stderr as a failure.
    pub fn reject_stderr(mut self) -> Self {
        self.reject_stderr = true;
        self
    }

    /// Do not fail on a non-zero exit status. For tools that encode findings
    /// in their exit code.
    pub fn accept_any_exit(mut self) -> Self {
        self.accept_any_exit = true;
        self
    }

    /// Human-readable name used in errors and logs, e.g. `composer audit`.
    pub fn label(&self) -> String {
        match self.args.first() {
            Some(first) if !first.starts_with('-') => format!("{} {}", self.program, first),
            _ => self.program.clone(),
        }
    }

    /// Run the tool in `cwd` and check its exit status and stderr.
    pub async fn run(&self, cwd: &Path) -> Result<ToolOutput, AuditError> {
        debug!("Running {} {:?} in {}", self.program, self.args, cwd.display());

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(result) => result
                .map_err(|e| AuditError::tool(self.label(), format!("failed to start: {}", e)))?,
            Err(_) => {
                return Err(AuditError::Timeout {
                    operation: self.label(),
                    seconds: self.timeout.as_secs(),
                })
            }
        };

        let output = ToolOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
        };

        if !self.accept_any_exit && output.exit_code != Some(0) {
            return Err(AuditError::tool(
                self.label(),
                format!(
                    "exit status {}: {}",
                    output
                        .exit_code
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "signal".to_string()),
                    output.stderr.trim()
                ),
            ));
        }

        if self.reject_stderr && !output.stderr.trim().is_empty() {
            return Err(AuditError::tool(self.label(), output.stderr.trim().to_string()));
        }

        Ok(output)
    }

    /// Run the tool and parse its stdout as JSON.
    pub async fn run_json(&self, cwd: &Path) -> Result<Value, AuditError> {
        let output = self.run(cwd).await?;

        serde_json::from_str(&output.stdout)
            .map_err(|e| AuditError::malformed(self.label(), e.to_string()))
    }
}
