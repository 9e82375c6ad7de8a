//! MySQL Backup Agent - Main entry point
//!
//! Backup, restore and point-in-time recovery for xtrabackup-managed servers.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand, ValueEnum};
use mysql_backup_agent::catalog::{EntryId, EntryKind, FsCatalog};
use mysql_backup_agent::config::NotifyConfig;
use mysql_backup_agent::notify::{Notification, NotifierSet};
use mysql_backup_agent::orchestrator::{BackupType, Orchestrator};
use mysql_backup_agent::pitr::PitrRequest;
use mysql_backup_agent::restore::StdinConfirmer;
use mysql_backup_agent::tool::mysql::STOP_DATETIME_FORMAT;
use mysql_backup_agent::tool::{ClientAuth, CommandRunner, DryRunRunner, ProcessRunner};
use mysql_backup_agent::utils::format::format_bytes;
use mysql_backup_agent::{utils, Config, OrchestratorError};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Backup directory (overrides config)
    #[arg(long, value_name = "DIR", global = true)]
    backup_dir: Option<PathBuf>,

    /// Log commands instead of running them
    #[arg(long, global = true)]
    dry_run: bool,

    /// Do not ask before destructive steps
    #[arg(long, global = true)]
    force: bool,

    /// Continue past binary-log copy and coverage problems
    #[arg(long, global = true)]
    ignore_errors: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[arg(long, global = true)]
    host: Option<String>,

    #[arg(long, global = true)]
    port: Option<u16>,

    #[arg(long, global = true)]
    user: Option<String>,

    #[arg(long, global = true)]
    password: Option<String>,

    /// Client option file holding the credentials
    #[arg(long, value_name = "FILE", global = true)]
    credentials_file: Option<PathBuf>,

    #[arg(long, value_name = "PATH", global = true)]
    socket: Option<PathBuf>,

    /// Remove entries older than this many days
    #[arg(long, global = true)]
    max_age_days: Option<u32>,

    #[arg(long, global = true)]
    keep_full: Option<usize>,

    #[arg(long, global = true)]
    keep_incremental: Option<usize>,

    #[arg(long, global = true)]
    keep_binlog: Option<usize>,

    /// Compress backups
    #[arg(long, global = true)]
    compress: bool,

    /// Encrypt backups with this key file
    #[arg(long, value_name = "FILE", global = true)]
    encrypt_key_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Take a backup and apply retention
    Backup {
        #[arg(long = "type", value_enum, default_value = "full")]
        kind: BackupArg,
    },
    /// Prepare and restore a backup chain
    Restore {
        /// Entry id such as incr_20260301120000; the newest backup when omitted
        #[arg(long)]
        target: Option<String>,
    },
    /// Restore, then replay binary logs up to a point in time
    Pitr {
        /// Stop time, "YYYY-MM-DD HH:MM:SS"
        #[arg(long)]
        datetime: String,

        #[arg(long)]
        target: Option<String>,

        /// Replay onto the running server without restoring
        #[arg(long)]
        pitr_only: bool,
    },
    /// List catalog entries
    List {
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
    },
    /// Apply retention policies
    Prune,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum BackupArg {
    Full,
    Incremental,
    Binlog,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    Full,
    Incremental,
    Binlog,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Backup { .. } => "backup",
            Command::Restore { .. } => "restore",
            Command::Pitr { .. } => "pitr",
            Command::List { .. } => "list",
            Command::Prune => "prune",
        }
    }
}

impl Args {
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(dir) = &self.backup_dir {
            config.backup.backup_dir = dir.clone();
        }
        if self.compress {
            config.backup.compress = true;
        }
        if let Some(key) = &self.encrypt_key_file {
            config.backup.encrypt_key_file = Some(key.clone());
        }

        let conn = &mut config.connection;
        if let Some(host) = &self.host {
            conn.host = host.clone();
        }
        if let Some(port) = self.port {
            conn.port = port;
        }
        if let Some(user) = &self.user {
            conn.user = Some(user.clone());
        }
        if let Some(password) = &self.password {
            conn.password = Some(password.clone());
        }
        if let Some(file) = &self.credentials_file {
            conn.credentials_file = Some(file.clone());
        }
        if let Some(socket) = &self.socket {
            conn.socket = Some(socket.clone());
        }

        let retention = &mut config.retention;
        if self.max_age_days.is_some() {
            retention.max_age_days = self.max_age_days;
        }
        if self.keep_full.is_some() {
            retention.keep_full = self.keep_full;
        }
        if self.keep_incremental.is_some() {
            retention.keep_incremental = self.keep_incremental;
        }
        if self.keep_binlog.is_some() {
            retention.keep_binlog = self.keep_binlog;
        }

        config.run.dry_run = self.dry_run;
        config.run.force = self.force;
        config.run.ignore_errors = self.ignore_errors;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            // No config means no configured channels; report through the log only
            utils::logger::init(args.log_level.as_deref().unwrap_or("info"))?;
            let notification = Notification::failure(args.command.name(), format!("{:#}", e));
            NotifierSet::from_config(&NotifyConfig::default())
                .notify_all(&notification)
                .await;
            return Err(e);
        }
    };
    args.apply_overrides(&mut config);

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!(
        "Starting mysql-backup-agent v{} ({})",
        env!("CARGO_PKG_VERSION"),
        args.command.name()
    );

    let notifiers = NotifierSet::from_config(&config.notify);
    let operation = args.command.name();
    let outcome = if config.run.dry_run {
        execute(&args.command, &config, &DryRunRunner).await
    } else {
        execute(&args.command, &config, &ProcessRunner).await
    };

    let notification = match &outcome {
        Ok(summary) => Notification::success(operation, summary.clone()),
        Err(e) => Notification::failure(operation, e.to_string()),
    };
    notifiers.notify_all(&notification).await;

    outcome?;
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path).with_context(|| format!("failed to load {}", path.display())),
        None => Ok(Config::default()),
    }
}

async fn execute<R: CommandRunner>(
    command: &Command,
    config: &Config,
    runner: &R,
) -> mysql_backup_agent::Result<String> {
    config.validate()?;
    let auth = ClientAuth::from_config(&config.connection)?;
    let catalog = FsCatalog::open(&config.backup.backup_dir)?;
    let orchestrator = Orchestrator::new(config, &catalog, runner, &auth, &StdinConfirmer);

    match command {
        Command::Backup { kind } => {
            let kind = match kind {
                BackupArg::Full => BackupType::Full,
                BackupArg::Incremental => BackupType::Incremental,
                BackupArg::Binlog => BackupType::Binlog,
            };
            Ok(match orchestrator.backup(kind).await? {
                Some(entry) => format!("{} captured ({})", entry.id, format_bytes(entry.size_bytes)),
                None => "dry run complete, nothing captured".to_string(),
            })
        }
        Command::Restore { target } => {
            let chain = orchestrator.restore(target.as_deref().map(EntryId::from)).await?;
            Ok(format!("restored {} ({} chain elements)", chain.target().id, chain.len()))
        }
        Command::Pitr {
            datetime,
            target,
            pitr_only,
        } => {
            let stop_at = NaiveDateTime::parse_from_str(datetime, STOP_DATETIME_FORMAT).map_err(|e| {
                OrchestratorError::ConfigInvalid(format!("invalid --datetime '{}': {}", datetime, e))
            })?;
            let report = orchestrator
                .pitr(&PitrRequest {
                    stop_at,
                    target: target.as_deref().map(EntryId::from),
                    pitr_only: *pitr_only,
                })
                .await?;
            Ok(format!(
                "replayed {} from {} ({} segments) up to {}",
                format_bytes(report.replayed_bytes as u64),
                report.binlog_set,
                report.segments_read,
                stop_at
            ))
        }
        Command::List { kind } => {
            let kind = kind.map(|k| match k {
                KindArg::Full => EntryKind::Full,
                KindArg::Incremental => EntryKind::Incremental,
                KindArg::Binlog => EntryKind::BinlogSet,
            });
            let entries = orchestrator.list(kind)?;
            for entry in &entries {
                println!(
                    "{:<24} {:<12} {:<10} {:>10}  {}",
                    entry.id.to_string(),
                    entry.kind.to_string(),
                    entry.state.to_string(),
                    format_bytes(entry.size_bytes),
                    entry.base_id.as_ref().map(|b| b.to_string()).unwrap_or_default()
                );
            }
            Ok(format!("{} entries", entries.len()))
        }
        Command::Prune => {
            let report = orchestrator.prune()?;
            Ok(format!(
                "removed {} entries, freed {}",
                report.removed.len(),
                format_bytes(report.freed_bytes)
            ))
        }
    }
}
