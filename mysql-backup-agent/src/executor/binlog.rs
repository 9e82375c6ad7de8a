//! Binary-log archiving.
//!
//! Segments belonging to the server's active log series are copied into a
//! `binlogs_<timestamp>/` entry together with the raw status output they were
//! selected from. Archives are never chained, so no pointer is updated.

use crate::catalog::{BackupEntry, Catalog, EntryKind, EntryState, SIDECAR_FILE};
use crate::config::Config;
use crate::fs::walker::{calculate_total_size, list_files_sorted};
use crate::tool::mysql::MysqlClient;
use crate::tool::{run_checked, ClientAuth, CommandRunner};
use crate::utils::errors::{OrchestratorError, Result};
use crate::utils::format::format_bytes;
use chrono::NaiveDateTime;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Raw `SHOW MASTER STATUS` output kept next to the copied segments.
pub const MASTER_STATUS_FILE: &str = "master_status.txt";

/// Archived segments inside a binlog-set directory, in replay order.
pub fn segments(set_dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    list_files_sorted(set_dir, &[MASTER_STATUS_FILE, SIDECAR_FILE])
}

pub struct BinlogArchiver<'a, R: CommandRunner> {
    config: &'a Config,
    catalog: &'a dyn Catalog,
    runner: &'a R,
    auth: &'a ClientAuth,
}

impl<'a, R: CommandRunner> BinlogArchiver<'a, R> {
    pub fn new(config: &'a Config, catalog: &'a dyn Catalog, runner: &'a R, auth: &'a ClientAuth) -> Self {
        Self {
            config,
            catalog,
            runner,
            auth,
        }
    }

    pub async fn capture(&self) -> Result<Option<BackupEntry>> {
        self.capture_at(super::now_seconds()).await
    }

    pub async fn capture_at(&self, created_at: NaiveDateTime) -> Result<Option<BackupEntry>> {
        if self.config.run.dry_run {
            info!(
                days = self.config.binlog.days_window,
                "Dry run: would archive recent binary-log segments"
            );
            return Ok(None);
        }

        let client = MysqlClient::new(self.config, self.auth);
        let status = run_checked(self.runner, &client.query("binary log status", "SHOW MASTER STATUS"))
            .await?
            .stdout_text();
        let active = status
            .split_whitespace()
            .next()
            .map(str::to_string)
            .ok_or_else(|| OrchestratorError::ConfigInvalid("binary logging is not enabled on the server".into()))?;

        let basename = run_checked(
            self.runner,
            &client.query("binary log location", "SELECT @@log_bin_basename"),
        )
        .await?
        .stdout_text();
        let log_dir = Path::new(basename.trim())
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| OrchestratorError::NotFound(format!("binary log directory for {}", basename.trim())))?;

        let prefix = match active.rsplit_once('.') {
            Some((series, _)) => format!("{}.", series),
            None => format!("{}.", active),
        };
        let window = Duration::from_secs(u64::from(self.config.binlog.days_window) * 86_400);
        let candidates = recent_segments(&log_dir, &prefix, window)?;
        info!(active = %active, dir = %log_dir.display(), count = candidates.len(), "Selected binary-log segments");

        let (id, path) = self.catalog.allocate(EntryKind::BinlogSet, created_at)?;
        fs::write(path.join(MASTER_STATUS_FILE), &status)?;

        let mut copied = Vec::new();
        let mut failed = Vec::new();
        for source in &candidates {
            let Some(name) = source.file_name() else { continue };
            let dest = path.join(name);
            match fs::copy(source, &dest) {
                Ok(bytes) => {
                    debug!(segment = %name.to_string_lossy(), bytes, "Copied binary-log segment");
                    copied.push(dest);
                }
                Err(e) => {
                    warn!(segment = %source.display(), error = %e, "Failed to copy binary-log segment");
                    failed.push(name.to_string_lossy().into_owned());
                }
            }
        }

        if !failed.is_empty() {
            let err = OrchestratorError::PartialCopyFailure {
                copied: copied.len(),
                failed,
            };
            if self.config.run.ignore_errors || self.config.binlog.ignore_copy_errors {
                warn!(entry = %id, "{}", err);
            } else {
                discard(&path);
                return Err(err);
            }
        }

        if copied.is_empty() {
            discard(&path);
            return Err(OrchestratorError::VerificationFailed {
                entry: id.to_string(),
                reason: format!(
                    "no binary-log segments matching {}* modified in the last {} day(s)",
                    prefix, self.config.binlog.days_window
                ),
            });
        }

        let statement_count_estimate = self.estimate_statements(&client, &copied).await;
        let size_bytes = calculate_total_size(&path)?;
        let entry = BackupEntry {
            id: id.clone(),
            kind: EntryKind::BinlogSet,
            path,
            created_at,
            base_id: None,
            compressed: false,
            encrypted: false,
            state: EntryState::Verified,
            size_bytes,
            statement_count_estimate,
        };
        self.catalog.record(&entry)?;

        info!(
            entry = %id,
            segments = copied.len(),
            size = %format_bytes(size_bytes),
            statements = ?statement_count_estimate,
            "Binary logs archived"
        );
        Ok(Some(entry))
    }

    /// Count event headers the log reader prints; `None` when any segment is unreadable.
    async fn estimate_statements(&self, client: &MysqlClient<'_>, segments: &[PathBuf]) -> Option<u64> {
        let mut total = 0u64;
        for segment in segments {
            match run_checked(self.runner, &client.binlog_dump(segment, None, None)).await {
                Ok(output) => {
                    total += output
                        .stdout_text()
                        .lines()
                        .filter(|l| l.starts_with("# at "))
                        .count() as u64;
                }
                Err(e) => {
                    warn!(segment = %segment.display(), error = %e, "Cannot estimate statement count");
                    return None;
                }
            }
        }
        Some(total)
    }
}

fn recent_segments(log_dir: &Path, prefix: &str, window: Duration) -> Result<Vec<PathBuf>> {
    let now = SystemTime::now();
    let mut selected = Vec::new();
    for file in list_files_sorted(log_dir, &[])? {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !name.starts_with(prefix) || name.ends_with(".index") {
            continue;
        }
        let modified = fs::metadata(&file)?.modified()?;
        let age = now.duration_since(modified).unwrap_or_default();
        if age <= window {
            selected.push(file);
        }
    }
    Ok(selected)
}

fn discard(path: &Path) {
    if let Err(e) = fs::remove_dir_all(path) {
        warn!(path = %path.display(), error = %e, "Failed to remove incomplete binary-log archive");
    }
}
