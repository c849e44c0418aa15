//! Remote-shell command plumbing.
//!
//! Skiff reaches the server by spawning the configured remote-shell
//! client (`ssh` unless told otherwise) rather than speaking a wire
//! protocol. Every blocking invocation is bounded by a timeout so a hung
//! network call cannot stall the caller.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::error::{Result, SkiffError};

/// Output from a remote command execution.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Standard output.
    pub stdout: String,

    /// Standard error.
    pub stderr: String,

    /// Whether the command succeeded (exit code 0).
    pub success: bool,
}

impl CommandOutput {
    fn new(stdout: String, stderr: String, success: bool) -> Self {
        Self {
            stdout,
            stderr,
            success,
        }
    }
}

/// Run `program` with `args`, capturing output. Bounded by `timeout`.
pub async fn run_command(
    program: &str,
    args: &[String],
    timeout: Duration,
) -> Result<CommandOutput> {
    tracing::debug!("Running: {} {:?}", program, args);

    let future = Command::new(program).args(args).stdin(Stdio::null()).output();

    let output = tokio::time::timeout(timeout, future)
        .await
        .map_err(|_| {
            SkiffError::Shell(format!("'{}' timed out after {:?}", program, timeout))
        })?
        .map_err(|e| SkiffError::Shell(format!("Failed to execute {}: {}", program, e)))?;

    Ok(CommandOutput::new(
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    ))
}

/// Spawn `program` with `args` detached: all streams discarded, the child
/// is never awaited. The caller learns about completion through sentinel
/// files, not an exit code.
pub fn spawn_detached(program: &str, args: &[String]) -> Result<()> {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| SkiffError::Shell(format!("Failed to spawn {}: {}", program, e)))?;

    tracing::debug!("Detached {} (pid {:?})", program, child.id());
    Ok(())
}

/// Escape a string for safe interpolation into a remote shell command.
///
/// Wraps the value in single quotes and escapes embedded single quotes
/// using the `'\''` idiom. Plain path-like strings pass through bare.
pub fn shell_escape(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s.chars().all(|c| {
        c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' || c == '/' || c == ':'
    }) {
        return s.to_string();
    }
    let escaped = s.replace('\'', "'\\''");
    format!("'{}'", escaped)
}
