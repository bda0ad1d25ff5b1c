//! Subprocess execution behind a narrow capability interface
//!
//! Every discovery method that scrapes an OS tool goes through
//! [`CommandRunner`], so the parsers and the orchestrator never touch the
//! process API directly and tests can substitute canned output.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, trace};

use crate::error::{DiscoveryError, Result};

/// Operating-system family, used to pick tool invocations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    Unix,
}

impl Platform {
    /// Platform this binary was built for
    pub fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Unix
        }
    }
}

/// Captured result of a finished subprocess
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Turn a non-zero exit into [`DiscoveryError::CommandFailed`]
    pub fn into_stdout(self, program: &str) -> Result<String> {
        if self.success {
            Ok(self.stdout)
        } else {
            Err(DiscoveryError::CommandFailed {
                program: program.to_string(),
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` to completion, killing it once `timeout` elapses
    async fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput>;

    /// Run `program` for at most `window` and return whatever it printed to
    /// stdout. A process still running at the deadline is killed and its
    /// partial output kept, with `success` set to false.
    async fn capture(&self, program: &str, args: &[&str], window: Duration) -> Result<CommandOutput> {
        self.run(program, args, window).await
    }

    /// Whether `program` can be found on this system
    fn is_available(&self, program: &str) -> bool;
}

/// Locate `program` in the directories listed in `PATH`
pub fn find_in_path(program: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    let suffixes: &[&str] = if cfg!(windows) {
        &[".exe", ".cmd", ".bat", ""]
    } else {
        &[""]
    };

    std::env::split_paths(&path)
        .flat_map(|dir| {
            suffixes
                .iter()
                .map(move |suffix| dir.join(format!("{}{}", program, suffix)))
        })
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Runs real subprocesses with tokio
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
        trace!(program = %program, args = ?args, "Running command");

        let child = tokio::process::Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DiscoveryError::ToolUnavailable(program.to_string()));
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(DiscoveryError::Timeout {
                    program: program.to_string(),
                    timeout,
                });
            }
        };

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn capture(&self, program: &str, args: &[&str], window: Duration) -> Result<CommandOutput> {
        trace!(program = %program, args = ?args, "Capturing command output");

        let spawned = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DiscoveryError::ToolUnavailable(program.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let mut stdout = child.stdout.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "stdout was not captured")
        })?;

        let mut buf = Vec::new();
        let collect = async {
            let mut chunk = [0u8; 4096];
            loop {
                let n = stdout.read(&mut chunk).await?;
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            child.wait().await
        };
        let finished = tokio::time::timeout(window, collect).await;

        let success = match finished {
            Ok(status) => status?.success(),
            Err(_) => {
                debug!(program = %program, window = ?window, "Deadline reached, keeping partial output");
                if let Err(e) = child.kill().await {
                    debug!(program = %program, error = %e, "Failed to kill process");
                }
                false
            }
        };

        Ok(CommandOutput {
            success,
            stdout: String::from_utf8_lossy(&buf).into_owned(),
            stderr: String::new(),
        })
    }

    fn is_available(&self, program: &str) -> bool {
        find_in_path(program).is_some()
    }
}
