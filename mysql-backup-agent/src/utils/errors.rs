//! Error taxonomy for backup, restore and point-in-time recovery.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Configuration error: {0}")]
    ConfigInvalid(String),

    #[error("Backup chain for {target} is broken: {reason}")]
    ChainBroken { target: String, reason: String },

    #[error("Backup chain for {target} is ambiguous: several entries created at {created_at}")]
    AmbiguousChain { target: String, created_at: String },

    #[error("{step} failed (exit status {status}): {stderr}")]
    ToolInvocationFailed {
        step: String,
        status: i32,
        stderr: String,
    },

    #[error("Failed to acquire global read lock: {0}")]
    LockAcquisitionFailed(String),

    #[error("No binary-log archive found in the catalog")]
    NoBinlogSet,

    #[error("No full backup found in the catalog")]
    NoFullBackup,

    #[error("Binary-log copy incomplete: {copied} copied, {} failed ({})", .failed.len(), .failed.join(", "))]
    PartialCopyFailure { copied: usize, failed: Vec<String> },

    #[error("Binary-log archive does not cover the restored backup position ({0})")]
    BinlogCoverageGap(String),

    #[error("Prepare failed at entry {entry}: {source}")]
    PrepareFailed {
        entry: String,
        #[source]
        source: Box<OrchestratorError>,
    },

    #[error("Backup {0} has already been prepared; take a fresh copy before preparing again")]
    AlreadyPrepared(String),

    #[error("Restore failed during '{step}': {reason}")]
    RestoreFailed { step: String, reason: String },

    #[error("Binary-log replay failed{}: {message}", .line.map(|l| format!(" at line {}", l)).unwrap_or_default())]
    ReplayFailed { line: Option<u64>, message: String },

    #[error("Verification of {entry} failed: {reason}")]
    VerificationFailed { entry: String, reason: String },

    #[error("Backup entry not found: {0}")]
    NotFound(String),

    #[error("Backup entry already exists: {}", .0.display())]
    DuplicateEntry(PathBuf),

    #[error("Operation aborted: {0}")]
    Aborted(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
