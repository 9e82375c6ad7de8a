//! SQL client, admin and binary-log reader commands.

use super::{ClientAuth, ToolCommand};
use crate::config::Config;
use chrono::NaiveDateTime;
use std::path::Path;

/// Prefix that keeps replayed statements out of the target's own binary log.
pub const DISABLE_BINLOG_DIRECTIVE: &str = "SET SESSION sql_log_bin = 0;\n";

/// Timestamp layout accepted by `--stop-datetime`.
pub const STOP_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct MysqlClient<'a> {
    config: &'a Config,
    auth: &'a ClientAuth,
}

impl<'a> MysqlClient<'a> {
    pub fn new(config: &'a Config, auth: &'a ClientAuth) -> Self {
        Self { config, auth }
    }

    fn client(&self, step: impl Into<String>) -> ToolCommand {
        ToolCommand::new(step, &self.config.tools.mysql).args(self.auth.args())
    }

    /// Single query with tab-separated, header-less output.
    pub fn query(&self, step: &str, sql: &str) -> ToolCommand {
        self.client(step).args(["--batch", "--skip-column-names", "-e"]).arg(sql)
    }

    /// Long-lived interactive session fed through stdin.
    pub fn session(&self, step: &str) -> ToolCommand {
        self.client(step).args(["--batch", "--skip-column-names", "--unbuffered"])
    }

    /// Execute `script` as one ordered batch; stops at the first error.
    pub fn batch(&self, step: &str, script: Vec<u8>) -> ToolCommand {
        self.client(step).arg("--batch").stdin(script)
    }

    pub fn ping(&self) -> ToolCommand {
        ToolCommand::new("health check", &self.config.tools.mysqladmin)
            .args(self.auth.args())
            .arg("ping")
    }

    /// Decode one binary-log segment, excluding events committed after `stop`.
    pub fn binlog_dump(
        &self,
        segment: &Path,
        stop: Option<NaiveDateTime>,
        start_position: Option<u64>,
    ) -> ToolCommand {
        let name = segment
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut cmd = ToolCommand::new(format!("read binary log {}", name), &self.config.tools.mysqlbinlog);
        if let Some(stop) = stop {
            cmd = cmd.arg(format!("--stop-datetime={}", stop.format(STOP_DATETIME_FORMAT)));
        }
        if let Some(position) = start_position {
            cmd = cmd.arg(format!("--start-position={}", position));
        }
        cmd.arg(segment.display().to_string())
    }

    pub fn service(&self, step: &str, argv: &[String]) -> Option<ToolCommand> {
        let (program, args) = argv.split_first()?;
        Some(ToolCommand::new(step, program).args(args.iter().cloned()))
    }
}

/// Extract the failing line from a client error such as
/// `ERROR 1064 (42000) at line 57: You have an error in your SQL syntax`.
pub fn parse_error_line(stderr: &str) -> Option<u64> {
    stderr.lines().find_map(|line| {
        let rest = line.split(" at line ").nth(1)?;
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse().ok()
    })
}
