//! Capture path: full and incremental backups, binary-log archives, and the
//! read lock held around them.
//!
//! A capture only becomes `lastFull`/`lastIncremental` after the payload the
//! backup tool produced has been verified.

pub mod binlog;
pub mod lock;

use crate::catalog::{BackupEntry, Catalog, EntryId, EntryKind, EntryState, PointerSlot};
use crate::config::Config;
use crate::fs::walker::calculate_total_size;
use crate::tool::mysql::MysqlClient;
use crate::tool::xtrabackup::{Checkpoints, XtraBackup};
use crate::tool::{run_checked, ClientAuth, CommandRunner};
use crate::utils::errors::{OrchestratorError, Result};
use crate::utils::format::{format_bytes, format_duration};
use chrono::{NaiveDateTime, Timelike};
use lock::{LockCoordinator, LockHandle};
use tracing::{info, warn};

/// Which physical backup to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureKind {
    Full,
    Incremental,
}

/// Drives the backup tool for full and incremental captures.
pub struct BackupExecutor<'a, R: CommandRunner> {
    config: &'a Config,
    catalog: &'a dyn Catalog,
    runner: &'a R,
    auth: &'a ClientAuth,
}

impl<'a, R: CommandRunner> BackupExecutor<'a, R> {
    pub fn new(config: &'a Config, catalog: &'a dyn Catalog, runner: &'a R, auth: &'a ClientAuth) -> Self {
        Self {
            config,
            catalog,
            runner,
            auth,
        }
    }

    /// Capture a backup now. Returns `None` in dry-run mode.
    pub async fn capture(&self, kind: CaptureKind) -> Result<Option<BackupEntry>> {
        self.capture_at(kind, now_seconds()).await
    }

    pub async fn capture_at(&self, kind: CaptureKind, created_at: NaiveDateTime) -> Result<Option<BackupEntry>> {
        let started = std::time::Instant::now();
        let base = match kind {
            CaptureKind::Full => None,
            CaptureKind::Incremental => Some(self.incremental_base()?),
        };
        let entry_kind = match kind {
            CaptureKind::Full => EntryKind::Full,
            CaptureKind::Incremental => EntryKind::Incremental,
        };
        let xtrabackup = XtraBackup::new(self.config, self.auth);

        if self.config.run.dry_run {
            let id = EntryId::new(entry_kind, created_at)
                .ok_or_else(|| OrchestratorError::ConfigInvalid("invalid capture kind".into()))?;
            let target = self.config.backup.backup_dir.join(id.as_str());
            let cmd = xtrabackup.backup(&target, base.as_ref().map(|b| b.path.as_path()));
            self.runner.run(&cmd).await?;
            info!(entry = %id, "Dry run: nothing captured");
            return Ok(None);
        }

        // Lock before touching disk so a failed acquisition leaves nothing behind
        let mut lock = if self.config.lock.enabled {
            let session = MysqlClient::new(self.config, self.auth).session("global read lock");
            LockCoordinator::new(session, &self.config.lock).acquire().await?
        } else {
            LockHandle::released()
        };

        let (id, path) = match self.catalog.allocate(entry_kind, created_at) {
            Ok(allocated) => allocated,
            Err(e) => {
                lock.release().await?;
                return Err(e);
            }
        };
        info!(entry = %id, kind = %entry_kind, base = ?base.as_ref().map(|b| &b.id), "Starting capture");

        let cmd = xtrabackup.backup(&path, base.as_ref().map(|b| b.path.as_path()));
        let outcome = run_checked(self.runner, &cmd).await;
        if let Err(e) = lock.release().await {
            warn!(error = %e, "Failed to release global read lock");
        }

        if let Err(e) = outcome {
            warn!(entry = %id, "Capture failed, removing incomplete directory");
            if let Err(rm) = std::fs::remove_dir_all(&path) {
                warn!(entry = %id, error = %rm, "Failed to remove incomplete capture");
            }
            return Err(e);
        }

        let size_bytes = calculate_total_size(&path)?;
        let mut entry = BackupEntry {
            id: id.clone(),
            kind: entry_kind,
            path: path.clone(),
            created_at,
            base_id: base.as_ref().map(|b| b.id.clone()),
            compressed: self.config.backup.compress,
            encrypted: self.config.backup.encrypt_key_file.is_some(),
            state: EntryState::Captured,
            size_bytes,
            statement_count_estimate: None,
        };
        self.catalog.record(&entry)?;

        verify_capture(&entry, base.as_ref())?;
        self.catalog.update_state(&id, EntryState::Verified)?;
        entry.state = EntryState::Verified;

        let slot = match kind {
            CaptureKind::Full => PointerSlot::LastFull,
            CaptureKind::Incremental => PointerSlot::LastIncremental,
        };
        self.catalog.set_pointer(slot, &id)?;

        info!(
            entry = %id,
            size = %format_bytes(size_bytes),
            duration = %format_duration(started.elapsed().as_secs()),
            "Capture verified"
        );
        Ok(Some(entry))
    }

    /// The newest verified entry an incremental can be taken against.
    fn incremental_base(&self) -> Result<BackupEntry> {
        let full_id = self
            .catalog
            .get_pointer(PointerSlot::LastFull)?
            .ok_or(OrchestratorError::NoFullBackup)?;
        let full = match self.catalog.get(&full_id) {
            Ok(entry) if entry.kind == EntryKind::Full => entry,
            Ok(_) | Err(OrchestratorError::NotFound(_)) => return Err(OrchestratorError::NoFullBackup),
            Err(e) => return Err(e),
        };

        if let Some(incr_id) = self.catalog.get_pointer(PointerSlot::LastIncremental)? {
            match self.catalog.get(&incr_id) {
                Ok(incr) if incr.kind == EntryKind::Incremental && incr.created_at > full.created_at => {
                    return Ok(incr);
                }
                Ok(_) => {}
                Err(OrchestratorError::NotFound(_)) => {
                    warn!(entry = %incr_id, "Last incremental is missing, using last full as base");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(full)
    }
}

/// Check the payload the backup tool left behind before trusting the entry.
pub fn verify_capture(entry: &BackupEntry, base: Option<&BackupEntry>) -> Result<()> {
    let fail = |reason: String| OrchestratorError::VerificationFailed {
        entry: entry.id.to_string(),
        reason,
    };

    let checkpoints = Checkpoints::read(&entry.path)?
        .ok_or_else(|| fail("xtrabackup_checkpoints is missing".into()))?;

    let expected = match entry.kind {
        EntryKind::Full => "full-backuped",
        EntryKind::Incremental => "incremental",
        other => return Err(fail(format!("{} entries carry no checkpoints", other))),
    };
    if checkpoints.backup_type != expected {
        return Err(fail(format!(
            "backup_type is '{}', expected '{}'",
            checkpoints.backup_type, expected
        )));
    }

    if let Some(base) = base {
        if let Some(base_checkpoints) = Checkpoints::read(&base.path)? {
            if checkpoints.from_lsn != base_checkpoints.to_lsn {
                return Err(fail(format!(
                    "from_lsn {} does not continue base {} (to_lsn {})",
                    checkpoints.from_lsn, base.id, base_checkpoints.to_lsn
                )));
            }
        }
    }
    Ok(())
}

/// Local wall-clock time truncated to whole seconds, matching entry naming.
pub fn now_seconds() -> NaiveDateTime {
    let now = chrono::Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}
