//! Configuration management for the backup agent.
//!
//! Loads configuration from a TOML file; command-line flags are applied on top
//! in `main` and the result is validated once before any external tool runs.
//! Components receive the finished `Config` by reference and never read
//! process-wide state themselves.

use crate::utils::errors::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backup: BackupConfig,
    pub connection: ConnectionConfig,
    pub server: ServerConfig,
    pub lock: LockConfig,
    pub binlog: BinlogConfig,
    pub retention: RetentionConfig,
    pub tools: ToolsConfig,
    pub notify: NotifyConfig,
    pub log: LogConfig,

    /// Per-invocation switches taken from the command line only
    #[serde(skip)]
    pub run: RunOptions,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Log external commands instead of running them; touch nothing on disk
    pub dry_run: bool,

    /// Skip the destructive-intent confirmation
    pub force: bool,

    /// Downgrade binary-log copy and coverage problems to warnings
    pub ignore_errors: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Root directory holding `full_*`, `incr_*` and `binlogs_*` entries
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,

    /// Compress captured payloads
    #[serde(default)]
    pub compress: bool,

    /// Threads used for compression and decompression
    #[serde(default = "default_threads")]
    pub compress_threads: u32,

    /// Parallel copy threads passed to the backup tool
    #[serde(default = "default_threads")]
    pub parallel: u32,

    /// Key file enabling payload encryption
    #[serde(default)]
    pub encrypt_key_file: Option<PathBuf>,

    /// Encryption algorithm understood by the backup tool
    #[serde(default = "default_encrypt_algorithm")]
    pub encrypt_algorithm: String,

    /// `ionice` class/level wrapper for capture, e.g. "2:7"
    #[serde(default)]
    pub io_priority: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub user: Option<String>,

    /// Never logged; written to a private option file for each invocation
    #[serde(default)]
    pub password: Option<String>,

    /// Existing client option file; mutually exclusive with `password`
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,

    #[serde(default)]
    pub socket: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Live data directory that restore clears and repopulates
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// "user:group" applied recursively after copy-back
    #[serde(default = "default_data_owner")]
    pub data_owner: Option<String>,

    #[serde(default = "default_stop_command")]
    pub stop_command: Vec<String>,

    #[serde(default = "default_start_command")]
    pub start_command: Vec<String>,

    /// Upper bound for health polling after start
    #[serde(default = "default_health_timeout")]
    pub health_timeout_secs: u64,

    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Hold a global read lock around full/incremental capture
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// `lock_wait_timeout` for the locking session
    #[serde(default = "default_lock_wait_timeout")]
    pub wait_timeout_secs: u64,

    /// How long to wait for the lock to be confirmed
    #[serde(default = "default_grace_period")]
    pub grace_period_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinlogConfig {
    /// Only segments modified within this many days are archived
    #[serde(default = "default_binlog_days")]
    pub days_window: u32,

    /// Downgrade segment copy failures to warnings
    #[serde(default)]
    pub ignore_copy_errors: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Age horizon in days; `None` disables the age policy
    #[serde(default)]
    pub max_age_days: Option<u32>,

    #[serde(default)]
    pub keep_full: Option<usize>,

    #[serde(default)]
    pub keep_incremental: Option<usize>,

    #[serde(default)]
    pub keep_binlog: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_xtrabackup")]
    pub xtrabackup: PathBuf,

    #[serde(default = "default_mysql")]
    pub mysql: PathBuf,

    #[serde(default = "default_mysqlbinlog")]
    pub mysqlbinlog: PathBuf,

    #[serde(default = "default_mysqladmin")]
    pub mysqladmin: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Endpoints receiving a JSON report for every operation outcome
    #[serde(default)]
    pub webhook_urls: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_backup_dir() -> PathBuf {
    PathBuf::from("/var/backups/mysql")
}

fn default_threads() -> u32 {
    4
}

fn default_encrypt_algorithm() -> String {
    "AES256".to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    3306
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/mysql")
}

fn default_data_owner() -> Option<String> {
    Some("mysql:mysql".to_string())
}

fn default_stop_command() -> Vec<String> {
    vec!["systemctl".into(), "stop".into(), "mysql".into()]
}

fn default_start_command() -> Vec<String> {
    vec!["systemctl".into(), "start".into(), "mysql".into()]
}

fn default_health_timeout() -> u64 {
    60
}

fn default_health_interval() -> u64 {
    2
}

fn default_true() -> bool {
    true
}

fn default_lock_wait_timeout() -> u64 {
    30
}

fn default_grace_period() -> u64 {
    2000
}

fn default_binlog_days() -> u32 {
    1
}

fn default_xtrabackup() -> PathBuf {
    PathBuf::from("xtrabackup")
}

fn default_mysql() -> PathBuf {
    PathBuf::from("mysql")
}

fn default_mysqlbinlog() -> PathBuf {
    PathBuf::from("mysqlbinlog")
}

fn default_mysqladmin() -> PathBuf {
    PathBuf::from("mysqladmin")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            backup_dir: default_backup_dir(),
            compress: false,
            compress_threads: default_threads(),
            parallel: default_threads(),
            encrypt_key_file: None,
            encrypt_algorithm: default_encrypt_algorithm(),
            io_priority: None,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: None,
            password: None,
            credentials_file: None,
            socket: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            data_owner: default_data_owner(),
            stop_command: default_stop_command(),
            start_command: default_start_command(),
            health_timeout_secs: default_health_timeout(),
            health_interval_secs: default_health_interval(),
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            wait_timeout_secs: default_lock_wait_timeout(),
            grace_period_ms: default_grace_period(),
        }
    }
}

impl Default for BinlogConfig {
    fn default() -> Self {
        Self {
            days_window: default_binlog_days(),
            ignore_copy_errors: false,
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            xtrabackup: default_xtrabackup(),
            mysql: default_mysql(),
            mysqlbinlog: default_mysqlbinlog(),
            mysqladmin: default_mysqladmin(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ServerConfig {
    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Reject configurations that must never reach an external tool.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(OrchestratorError::ConfigInvalid(msg.to_string()));

        if self.backup.backup_dir.as_os_str().is_empty() {
            return invalid("backup_dir must not be empty");
        }
        if self.connection.password.is_some() && self.connection.credentials_file.is_some() {
            return invalid("password and credentials_file are mutually exclusive");
        }
        if self.connection.password.is_some() && self.connection.user.is_none() {
            return invalid("password requires a user");
        }
        if let Some(file) = &self.connection.credentials_file {
            if !file.is_file() {
                return Err(OrchestratorError::ConfigInvalid(format!(
                    "credentials file {} does not exist",
                    file.display()
                )));
            }
        }
        if let Some(key) = &self.backup.encrypt_key_file {
            if !key.is_file() {
                return Err(OrchestratorError::ConfigInvalid(format!(
                    "encryption key file {} does not exist",
                    key.display()
                )));
            }
        }
        if self.backup.compress_threads == 0 || self.backup.parallel == 0 {
            return invalid("thread counts must be at least 1");
        }
        if let Some(priority) = &self.backup.io_priority {
            if parse_io_priority(priority).is_none() {
                return invalid("io_priority must look like <class>:<level>, e.g. 2:7");
            }
        }
        if self.server.stop_command.is_empty() || self.server.start_command.is_empty() {
            return invalid("server stop/start commands must not be empty");
        }
        if self.server.health_interval_secs > self.server.health_timeout_secs {
            return invalid("health_interval_secs must not exceed health_timeout_secs");
        }
        Ok(())
    }
}

/// Split an `ionice` priority of the form `class:level`.
pub fn parse_io_priority(value: &str) -> Option<(u8, u8)> {
    let (class, level) = value.split_once(':')?;
    let class: u8 = class.trim().parse().ok()?;
    let level: u8 = level.trim().parse().ok()?;
    if !(1..=3).contains(&class) || level > 7 {
        return None;
    }
    Some((class, level))
}
