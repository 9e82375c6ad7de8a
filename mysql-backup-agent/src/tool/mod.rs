//! Structured invocation of external tools.
//!
//! Every external program (backup tool, SQL client, log reader, service
//! control) is described by a `ToolCommand` and executed through a
//! `CommandRunner`. Commands are argument vectors, never shell strings, and
//! secrets travel in private option files rather than in arguments, so a
//! command's `Display` form is always safe to log.

pub mod credentials;
pub mod mysql;
pub mod xtrabackup;

pub use credentials::ClientAuth;

use crate::utils::errors::{OrchestratorError, Result};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// One external program invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCommand {
    /// Human-readable step name used in logs and errors
    pub step: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Bytes fed to the program's standard input
    pub stdin: Option<Vec<u8>>,
}

impl ToolCommand {
    pub fn new(step: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            step: step.into(),
            program: program.into(),
            args: Vec::new(),
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, input: Vec<u8>) -> Self {
        self.stdin = Some(input);
        self
    }

    /// Run this command under `ionice` with the given class and level.
    pub fn with_io_priority(self, class: u8, level: u8) -> Self {
        let mut args = vec![
            format!("-c{}", class),
            format!("-n{}", level),
            self.program.display().to_string(),
        ];
        args.extend(self.args);
        Self {
            step: self.step,
            program: PathBuf::from("ionice"),
            args,
            stdin: self.stdin,
        }
    }

    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg.replace('\'', "'\\''"))?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Captured result of a finished invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOutput {
    /// Exit status; -1 when the process was terminated by a signal
    pub status: i32,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Executes tool commands. Implementations must not interpret arguments
/// through a shell.
pub trait CommandRunner {
    fn run(&self, command: &ToolCommand) -> impl Future<Output = Result<CommandOutput>>;
}

/// Run a command and turn a non-zero exit into `ToolInvocationFailed`.
pub async fn run_checked<R: CommandRunner + ?Sized>(
    runner: &R,
    command: &ToolCommand,
) -> Result<CommandOutput> {
    let output = runner.run(command).await?;
    if output.success() {
        Ok(output)
    } else {
        Err(OrchestratorError::ToolInvocationFailed {
            step: command.step.clone(),
            status: output.status,
            stderr: last_lines(&output.stderr, 10),
        })
    }
}

fn last_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}

/// Spawns real processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &ToolCommand) -> Result<CommandOutput> {
        info!(step = %command.step, "Running: {}", command);
        let started = std::time::Instant::now();

        let mut child = tokio::process::Command::new(&command.program)
            .args(&command.args)
            .stdin(if command.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OrchestratorError::ToolInvocationFailed {
                step: command.step.clone(),
                status: -1,
                stderr: format!("failed to start {}: {}", command.program.display(), e),
            })?;

        if let (Some(input), Some(mut stdin)) = (command.stdin.as_ref(), child.stdin.take()) {
            // Feed stdin concurrently so a chatty child cannot deadlock on a full stdout pipe
            let input = input.clone();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&input).await {
                    debug!(error = %e, "Child closed stdin early");
                }
            });
        }

        let output = child.wait_with_output().await?;
        let result = CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        debug!(
            step = %command.step,
            status = result.status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Command finished"
        );
        Ok(result)
    }
}

/// Logs commands instead of executing them.
#[derive(Debug, Clone, Default)]
pub struct DryRunRunner;

impl CommandRunner for DryRunRunner {
    async fn run(&self, command: &ToolCommand) -> Result<CommandOutput> {
        info!(step = %command.step, "[dry-run] Would run: {}", command);
        Ok(CommandOutput::default())
    }
}
