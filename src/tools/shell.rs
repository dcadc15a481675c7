//! Shell command runner.
//!
//! Provides controlled command execution with:
//! - Working directory per call
//! - Timeout enforcement (the child is killed on expiry)
//! - Output capture and truncation

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::ToolError;

/// Maximum output size before truncation (64KB).
const MAX_OUTPUT_SIZE: usize = 64 * 1024;

/// Exit code reported for a command killed on timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Output reported for a command killed on timeout.
pub const TIMEOUT_OUTPUT: &str = "TIMEOUT";

/// Captured result of a finished (or timed-out) command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn timed_out() -> Self {
        Self {
            exit_code: TIMEOUT_EXIT_CODE,
            output: TIMEOUT_OUTPUT.to_string(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.exit_code == TIMEOUT_EXIT_CODE && self.output == TIMEOUT_OUTPUT
    }
}

/// Runs shell command strings in a working directory.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` in `cwd`. A timeout is not an error: it yields
    /// [`CommandOutput::timed_out`]. Errors mean the command never ran.
    async fn run(
        &self,
        command: &str,
        cwd: &Path,
        timeout: Duration,
    ) -> Result<CommandOutput, ToolError>;
}

/// `sh -c` runner.
#[derive(Debug, Default, Clone)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(
        &self,
        command: &str,
        cwd: &Path,
        timeout: Duration,
    ) -> Result<CommandOutput, ToolError> {
        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };

        cmd.current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| ToolError::Spawn {
            command: truncate_for_error(command),
            reason: format!("{e} (cwd: {})", cwd.display()),
        })?;

        // Dropping the child on timeout kills it.
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(command = %truncate_for_error(command), ?timeout, "Command timed out");
                return Ok(CommandOutput::timed_out());
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = if stderr.is_empty() {
            stdout.into_owned()
        } else if stdout.is_empty() {
            stderr.into_owned()
        } else {
            format!("{}\n\n--- stderr ---\n{}", stdout, stderr)
        };

        let exit_code = output.status.code().unwrap_or(-1);
        debug!(command = %truncate_for_error(command), exit_code, "Command finished");

        Ok(CommandOutput {
            exit_code,
            output: truncate_output(&combined),
        })
    }
}

/// Quote a string for safe use as a single `sh` word.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// The last `max_chars` characters of `s`.
pub fn tail_chars(s: &str, max_chars: usize) -> &str {
    let count = s.chars().count();
    if count <= max_chars {
        return s;
    }
    match s.char_indices().nth(count - max_chars) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

/// Truncate output to fit within limits (UTF-8 safe).
fn truncate_output(s: &str) -> String {
    if s.len() <= MAX_OUTPUT_SIZE {
        s.to_string()
    } else {
        let half = MAX_OUTPUT_SIZE / 2;
        let head_end = floor_char_boundary(s, half);
        let tail_start = floor_char_boundary(s, s.len() - half);
        format!(
            "{}\n\n... [truncated {} bytes] ...\n\n{}",
            &s[..head_end],
            s.len() - MAX_OUTPUT_SIZE,
            &s[tail_start..]
        )
    }
}

/// Find the largest byte index <= `i` that is a valid char boundary.
fn floor_char_boundary(s: &str, i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    let mut pos = i;
    while pos > 0 && !s.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

/// Truncate command for error messages.
fn truncate_for_error(s: &str) -> String {
    if s.chars().count() <= 100 {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(100).collect::<String>())
    }
}
