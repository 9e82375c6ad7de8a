//! Command builders for the backup tool and readers for the metadata files
//! it leaves in every backup directory.

use super::{ClientAuth, ToolCommand};
use crate::config::{parse_io_priority, Config};
use crate::utils::errors::Result;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

pub const CHECKPOINTS_FILE: &str = "xtrabackup_checkpoints";
pub const BINLOG_INFO_FILE: &str = "xtrabackup_binlog_info";

/// Whether a prepare leaves the directory open for more incrementals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareMode {
    ApplyLogOnly,
    Final,
}

pub struct XtraBackup<'a> {
    config: &'a Config,
    auth: &'a ClientAuth,
}

impl<'a> XtraBackup<'a> {
    pub fn new(config: &'a Config, auth: &'a ClientAuth) -> Self {
        Self { config, auth }
    }

    fn base(&self, step: String) -> ToolCommand {
        ToolCommand::new(step, &self.config.tools.xtrabackup)
    }

    /// Capture into `target`, optionally as an incremental against `incremental_basedir`.
    pub fn backup(&self, target: &Path, incremental_basedir: Option<&Path>) -> ToolCommand {
        let backup = &self.config.backup;
        let step = match incremental_basedir {
            Some(_) => format!("incremental backup into {}", target.display()),
            None => format!("full backup into {}", target.display()),
        };

        let mut cmd = self
            .base(step)
            .args(self.auth.args())
            .arg("--backup")
            .arg(format!("--target-dir={}", target.display()));

        if let Some(base) = incremental_basedir {
            cmd = cmd.arg(format!("--incremental-basedir={}", base.display()));
        }
        if backup.compress {
            cmd = cmd
                .arg("--compress")
                .arg(format!("--compress-threads={}", backup.compress_threads));
        }
        if let Some(key_file) = &backup.encrypt_key_file {
            cmd = cmd
                .arg(format!("--encrypt={}", backup.encrypt_algorithm))
                .arg(format!("--encrypt-key-file={}", key_file.display()));
        }
        cmd = cmd.arg(format!("--parallel={}", backup.parallel));

        match backup.io_priority.as_deref().and_then(parse_io_priority) {
            Some((class, level)) => cmd.with_io_priority(class, level),
            None => cmd,
        }
    }

    pub fn decrypt(&self, dir: &Path) -> ToolCommand {
        let backup = &self.config.backup;
        let mut cmd = self
            .base(format!("decrypt {}", dir.display()))
            .arg(format!("--decrypt={}", backup.encrypt_algorithm));
        if let Some(key_file) = &backup.encrypt_key_file {
            cmd = cmd.arg(format!("--encrypt-key-file={}", key_file.display()));
        }
        cmd.arg(format!("--target-dir={}", dir.display()))
            .arg(format!("--parallel={}", backup.parallel))
            .arg("--remove-original")
    }

    pub fn decompress(&self, dir: &Path) -> ToolCommand {
        self.base(format!("decompress {}", dir.display()))
            .arg("--decompress")
            .arg(format!("--parallel={}", self.config.backup.compress_threads))
            .arg(format!("--target-dir={}", dir.display()))
            .arg("--remove-original")
    }

    /// Prepare `full_dir`, merging `incremental_dir` into it when given.
    pub fn prepare(&self, full_dir: &Path, incremental_dir: Option<&Path>, mode: PrepareMode) -> ToolCommand {
        let step = match incremental_dir {
            Some(incr) => format!("prepare {} with {}", full_dir.display(), incr.display()),
            None => format!("prepare {}", full_dir.display()),
        };
        let mut cmd = self.base(step).arg("--prepare");
        if mode == PrepareMode::ApplyLogOnly {
            cmd = cmd.arg("--apply-log-only");
        }
        cmd = cmd.arg(format!("--target-dir={}", full_dir.display()));
        if let Some(incr) = incremental_dir {
            cmd = cmd.arg(format!("--incremental-dir={}", incr.display()));
        }
        cmd
    }

    pub fn copy_back(&self, prepared_dir: &Path, data_dir: &Path) -> ToolCommand {
        self.base(format!("copy-back {}", prepared_dir.display()))
            .arg("--copy-back")
            .arg(format!("--target-dir={}", prepared_dir.display()))
            .arg(format!("--datadir={}", data_dir.display()))
            .arg(format!("--parallel={}", self.config.backup.parallel))
    }
}

/// Contents of `xtrabackup_checkpoints`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Checkpoints {
    pub backup_type: String,
    pub from_lsn: u64,
    pub to_lsn: u64,
    pub last_lsn: u64,
}

impl Checkpoints {
    /// `Ok(None)` when the directory has no checkpoints file.
    pub fn read(dir: &Path) -> Result<Option<Self>> {
        match fs::read_to_string(dir.join(CHECKPOINTS_FILE)) {
            Ok(raw) => Ok(Some(Self::parse(&raw))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn parse(raw: &str) -> Self {
        let mut checkpoints = Self::default();
        for line in raw.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "backup_type" => checkpoints.backup_type = value.to_string(),
                "from_lsn" => checkpoints.from_lsn = value.parse().unwrap_or(0),
                "to_lsn" => checkpoints.to_lsn = value.parse().unwrap_or(0),
                "last_lsn" => checkpoints.last_lsn = value.parse().unwrap_or(0),
                _ => {}
            }
        }
        checkpoints
    }

    /// Redo has already been applied; preparing again would corrupt the directory.
    pub fn is_prepared(&self) -> bool {
        matches!(self.backup_type.as_str(), "log-applied" | "full-prepared")
    }
}

/// Binary-log coordinates recorded at capture time (`xtrabackup_binlog_info`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinlogPosition {
    pub file: String,
    pub position: u64,
}

impl BinlogPosition {
    pub fn read(dir: &Path) -> Result<Option<Self>> {
        match fs::read_to_string(dir.join(BINLOG_INFO_FILE)) {
            Ok(raw) => Ok(Self::parse(&raw)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let mut fields = raw.split_whitespace();
        let file = fields.next()?.to_string();
        let position = fields.next()?.parse().ok()?;
        Some(Self { file, position })
    }
}
