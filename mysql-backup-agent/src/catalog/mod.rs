//! Backup catalog: the index of captured entries and the two catalog pointers.
//!
//! The `Catalog` trait is the contract the rest of the agent depends on.
//! `FsCatalog` implements it by scanning the backup directory for the
//! `full_*` / `incr_*` / `binlogs_*` naming convention plus sidecar records.
//!
//! A single orchestrator process is assumed to own a backup directory at a
//! time; the catalog does no file locking of its own.

pub mod entry;
pub mod store;

pub use entry::{BackupEntry, EntryId, EntryKind, EntryMetadata, EntryState, SIDECAR_FILE};
pub use store::FsCatalog;

use crate::utils::errors::Result;
use chrono::NaiveDateTime;
use std::path::PathBuf;

/// Named pointer slots kept at the backup-directory root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerSlot {
    LastFull,
    LastIncremental,
}

impl PointerSlot {
    pub fn file_name(&self) -> &'static str {
        match self {
            PointerSlot::LastFull => ".last_full",
            PointerSlot::LastIncremental => ".last_incremental",
        }
    }
}

/// Listing filter. `after` and `before` are both exclusive bounds on `created_at`.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub kind: Option<EntryKind>,
    pub after: Option<NaiveDateTime>,
    pub before: Option<NaiveDateTime>,
}

impl ListFilter {
    pub fn kind(kind: EntryKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn matches(&self, entry: &BackupEntry) -> bool {
        self.kind.map_or(true, |k| entry.kind == k)
            && self.after.map_or(true, |t| entry.created_at > t)
            && self.before.map_or(true, |t| entry.created_at < t)
    }
}

pub trait Catalog {
    /// Reserve the on-disk location for a new entry. Fails with
    /// `DuplicateEntry` when the derived id is already taken.
    fn allocate(&self, kind: EntryKind, created_at: NaiveDateTime) -> Result<(EntryId, PathBuf)>;

    /// Persist the entry's sidecar record.
    fn record(&self, entry: &BackupEntry) -> Result<EntryId>;

    /// Fetch one entry; `NotFound` when no payload exists under that id.
    fn get(&self, id: &EntryId) -> Result<BackupEntry>;

    /// Entries matching `filter`, ordered by `created_at` ascending.
    fn list(&self, filter: &ListFilter) -> Result<Vec<BackupEntry>>;

    fn update_state(&self, id: &EntryId, state: EntryState) -> Result<()>;

    /// Delete the entry's directory and everything in it.
    fn remove(&self, id: &EntryId) -> Result<()>;

    fn set_pointer(&self, slot: PointerSlot, id: &EntryId) -> Result<()>;

    fn get_pointer(&self, slot: PointerSlot) -> Result<Option<EntryId>>;
}
