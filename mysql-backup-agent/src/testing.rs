//! Test helpers: a scripted `CommandRunner` that imitates the backup tool,
//! the SQL client and the binary-log reader without a database server.

use crate::tool::xtrabackup::{Checkpoints, BINLOG_INFO_FILE, CHECKPOINTS_FILE};
use crate::tool::{CommandOutput, CommandRunner, ToolCommand};
use crate::utils::errors::Result;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// `2026-03-01 00:00:00` plus `hours`.
pub fn ts(hours: i64) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t + Duration::hours(hours))
        .unwrap_or_default()
}

/// Records every command and fakes the side effects the real tools have on disk.
#[derive(Default)]
pub struct FakeRunner {
    commands: Mutex<Vec<ToolCommand>>,
    failures: Vec<(String, String)>,
    skip_checkpoints: bool,
    binlog_output: HashMap<String, String>,
    binlog_position: Option<(String, u64)>,
    master_status: Option<String>,
    log_bin_basename: Option<PathBuf>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every command whose step contains `needle`.
    pub fn fail_step_containing(self, needle: &str) -> Self {
        self.fail_with(needle, "simulated failure")
    }

    pub fn fail_with(mut self, needle: &str, stderr: &str) -> Self {
        self.failures.push((needle.to_string(), stderr.to_string()));
        self
    }

    /// Backups succeed but leave no `xtrabackup_checkpoints` behind.
    pub fn without_checkpoints(mut self) -> Self {
        self.skip_checkpoints = true;
        self
    }

    /// Output the log reader produces for the segment named `segment`.
    pub fn binlog_output(mut self, segment: &str, text: &str) -> Self {
        self.binlog_output.insert(segment.to_string(), text.to_string());
        self
    }

    /// Binary-log coordinates written into every captured backup.
    pub fn binlog_position(mut self, file: &str, position: u64) -> Self {
        self.binlog_position = Some((file.to_string(), position));
        self
    }

    /// Answers for the binary-log status queries.
    pub fn binlog_status(mut self, status: &str, basename: &Path) -> Self {
        self.master_status = Some(status.to_string());
        self.log_bin_basename = Some(basename.to_path_buf());
        self
    }

    pub fn commands(&self) -> Vec<ToolCommand> {
        self.commands.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Steps of all recorded commands, in order.
    pub fn steps(&self) -> Vec<String> {
        self.commands().into_iter().map(|c| c.step).collect()
    }

    fn simulate(&self, cmd: &ToolCommand) -> std::io::Result<Vec<u8>> {
        // Dry runs point the tools at directories that were never created
        let target = arg_value(cmd, "--target-dir=")
            .map(PathBuf::from)
            .filter(|p| p.is_dir());

        if cmd.has_arg("--backup") {
            let Some(target) = target else { return Ok(Vec::new()) };
            fs::write(target.join("ibdata1"), vec![0u8; 1024])?;
            if let Some((file, position)) = &self.binlog_position {
                fs::write(target.join(BINLOG_INFO_FILE), format!("{}\t{}\n", file, position))?;
            }
            if !self.skip_checkpoints {
                let (backup_type, from_lsn) = match arg_value(cmd, "--incremental-basedir=") {
                    Some(base) => {
                        let base_cp = Checkpoints::read(Path::new(&base)).ok().flatten().unwrap_or_default();
                        ("incremental", base_cp.to_lsn)
                    }
                    None => ("full-backuped", 0),
                };
                write_checkpoints(&target, backup_type, from_lsn, from_lsn + 100)?;
            }
        } else if cmd.has_arg("--prepare") {
            let Some(target) = target else { return Ok(Vec::new()) };
            let cp = Checkpoints::read(&target).ok().flatten().unwrap_or_default();
            let backup_type = if cmd.has_arg("--apply-log-only") {
                "log-applied"
            } else {
                "full-prepared"
            };
            write_checkpoints(&target, backup_type, cp.from_lsn, cp.to_lsn)?;
        } else if cmd.has_arg("--copy-back") {
            if let Some(data_dir) = arg_value(cmd, "--datadir=") {
                fs::create_dir_all(&data_dir)?;
                fs::write(Path::new(&data_dir).join("ibdata1"), b"restored")?;
            }
        } else if cmd.step.starts_with("read binary log ") {
            let name = cmd.step.trim_start_matches("read binary log ");
            let text = self
                .binlog_output
                .get(name)
                .cloned()
                .unwrap_or_else(|| format!("-- events from {}\n", name));
            return Ok(text.into_bytes());
        } else if cmd.args.iter().any(|a| a.contains("SHOW MASTER STATUS")) {
            return Ok(self.master_status.clone().unwrap_or_default().into_bytes());
        } else if cmd.args.iter().any(|a| a.contains("@@log_bin_basename")) {
            let basename = self
                .log_bin_basename
                .as_ref()
                .map(|p| format!("{}\n", p.display()))
                .unwrap_or_default();
            return Ok(basename.into_bytes());
        }
        Ok(Vec::new())
    }
}

impl CommandRunner for FakeRunner {
    async fn run(&self, command: &ToolCommand) -> Result<CommandOutput> {
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(command.clone());
        }

        if let Some((_, stderr)) = self
            .failures
            .iter()
            .find(|(needle, _)| command.step.contains(needle.as_str()))
        {
            return Ok(CommandOutput {
                status: 1,
                stdout: Vec::new(),
                stderr: stderr.clone(),
            });
        }

        let stdout = self.simulate(command)?;
        Ok(CommandOutput {
            status: 0,
            stdout,
            stderr: String::new(),
        })
    }
}

fn arg_value(cmd: &ToolCommand, prefix: &str) -> Option<String> {
    cmd.args
        .iter()
        .find_map(|a| a.strip_prefix(prefix).map(str::to_string))
}

fn write_checkpoints(dir: &Path, backup_type: &str, from_lsn: u64, to_lsn: u64) -> std::io::Result<()> {
    fs::write(
        dir.join(CHECKPOINTS_FILE),
        format!(
            "backup_type = {}\nfrom_lsn = {}\nto_lsn = {}\nlast_lsn = {}\n",
            backup_type, from_lsn, to_lsn, to_lsn
        ),
    )
}
