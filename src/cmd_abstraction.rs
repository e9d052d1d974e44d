//! Command execution abstraction for testability.
//!
//! The iproute2 backend talks to the kernel by running `ip`. Going through
//! [`CommandExecutor`] lets unit tests script `ip` output and failures
//! without touching the host routing tables.

use anyhow::Result;
use std::process::{Command, Stdio};

#[cfg(test)]
use mockall::automock;

/// Output from command execution
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Whether the command exited with code 0
    pub success: bool,
    pub code: Option<i32>,
}

impl CommandOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            success: true,
            code: Some(0),
        }
    }

    /// Failed output (exit code 2, as `ip` uses) with the given stderr
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            success: false,
            code: Some(2),
        }
    }
}

/// Runs external programs.
///
/// `args` is `&[String]` rather than `&[&str]` because mockall cannot
/// express the nested lifetime.
#[cfg_attr(test, automock)]
pub trait CommandExecutor: Send + Sync {
    /// Run `cmd` with `args` and capture its output. Only a failure to spawn
    /// is an `Err`; a non-zero exit is reported through `CommandOutput`.
    fn execute(&self, cmd: &str, args: &[String]) -> Result<CommandOutput>;
}

/// Executor that spawns real processes
#[derive(Debug, Clone, Default)]
pub struct RealCommandExecutor;

impl CommandExecutor for RealCommandExecutor {
    fn execute(&self, cmd: &str, args: &[String]) -> Result<CommandOutput> {
        let output = Command::new(cmd)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
            code: output.status.code(),
        })
    }
}

pub fn args_to_strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}
