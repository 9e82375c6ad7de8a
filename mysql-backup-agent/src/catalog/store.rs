//! Directory-scanning catalog backing.

use super::entry::{BackupEntry, EntryId, EntryKind, EntryMetadata, EntryState, SIDECAR_FILE};
use super::{Catalog, ListFilter, PointerSlot};
use crate::utils::errors::{OrchestratorError, Result};
use chrono::NaiveDateTime;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Catalog rooted at a backup directory.
#[derive(Debug, Clone)]
pub struct FsCatalog {
    root: PathBuf,
}

impl FsCatalog {
    /// Open (and create if needed) the catalog at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn entry_path(&self, id: &EntryId) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// Load one entry directory; an unreadable sidecar yields a degraded entry.
    fn load(&self, id: EntryId, created_at: NaiveDateTime, path: PathBuf) -> BackupEntry {
        let sidecar = path.join(SIDECAR_FILE);
        let parsed = fs::read_to_string(&sidecar)
            .map_err(OrchestratorError::from)
            .and_then(|raw| serde_json::from_str::<EntryMetadata>(&raw).map_err(Into::into));

        match parsed {
            Ok(meta) => meta.into_entry(id, path),
            Err(e) => {
                warn!(entry = %id, error = %e, "Sidecar missing or unreadable, listing entry as unknown");
                BackupEntry::degraded(id, path, created_at)
            }
        }
    }

    fn write_sidecar(&self, path: &Path, meta: &EntryMetadata) -> Result<()> {
        let tmp = path.join(format!("{}.tmp", SIDECAR_FILE));
        fs::write(&tmp, serde_json::to_string_pretty(meta)?)?;
        fs::rename(&tmp, path.join(SIDECAR_FILE))?;
        Ok(())
    }
}

impl Catalog for FsCatalog {
    fn allocate(&self, kind: EntryKind, created_at: NaiveDateTime) -> Result<(EntryId, PathBuf)> {
        let id = EntryId::new(kind, created_at).ok_or_else(|| {
            OrchestratorError::ConfigInvalid(format!("cannot allocate an entry of kind {}", kind))
        })?;
        let path = self.entry_path(&id);

        match fs::create_dir(&path) {
            Ok(()) => Ok((id, path)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(OrchestratorError::DuplicateEntry(path))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn record(&self, entry: &BackupEntry) -> Result<EntryId> {
        if !entry.path.is_dir() {
            return Err(OrchestratorError::NotFound(entry.id.to_string()));
        }
        let base_path = entry.base_id.as_ref().map(|b| self.entry_path(b));
        let meta = EntryMetadata::from_entry(entry, base_path);
        self.write_sidecar(&entry.path, &meta)?;
        debug!(entry = %entry.id, kind = %entry.kind, state = %entry.state, "Recorded catalog entry");
        Ok(entry.id.clone())
    }

    fn get(&self, id: &EntryId) -> Result<BackupEntry> {
        let path = self.entry_path(id);
        if !path.is_dir() {
            return Err(OrchestratorError::NotFound(id.to_string()));
        }
        let created_at = EntryId::parse(id.as_str())
            .map(|(_, _, created_at)| created_at)
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;
        Ok(self.load(id.clone(), created_at, path))
    }

    fn list(&self, filter: &ListFilter) -> Result<Vec<BackupEntry>> {
        let mut entries = Vec::new();

        for dir_entry in fs::read_dir(&self.root)? {
            let dir_entry = match dir_entry {
                Ok(d) => d,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable catalog directory entry");
                    continue;
                }
            };
            if !dir_entry.path().is_dir() {
                continue;
            }
            let name = dir_entry.file_name();
            let Some((id, _, created_at)) = EntryId::parse(&name.to_string_lossy()) else {
                continue;
            };

            let entry = self.load(id, created_at, dir_entry.path());
            if filter.matches(&entry) {
                entries.push(entry);
            }
        }

        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(entries)
    }

    fn update_state(&self, id: &EntryId, state: EntryState) -> Result<()> {
        let mut entry = self.get(id)?;
        if entry.kind == EntryKind::Unknown {
            return Err(OrchestratorError::VerificationFailed {
                entry: id.to_string(),
                reason: "sidecar record is missing or unreadable".into(),
            });
        }
        entry.state = state;
        self.record(&entry)?;
        Ok(())
    }

    fn remove(&self, id: &EntryId) -> Result<()> {
        let path = self.entry_path(id);
        if !path.is_dir() {
            return Err(OrchestratorError::NotFound(id.to_string()));
        }
        fs::remove_dir_all(&path)?;
        Ok(())
    }

    fn set_pointer(&self, slot: PointerSlot, id: &EntryId) -> Result<()> {
        let target = self.entry_path(id);
        let tmp = self.root.join(format!("{}.tmp", slot.file_name()));
        fs::write(&tmp, format!("{}\n", target.display()))?;
        fs::rename(&tmp, self.root.join(slot.file_name()))?;
        Ok(())
    }

    fn get_pointer(&self, slot: PointerSlot) -> Result<Option<EntryId>> {
        let raw = match fs::read_to_string(self.root.join(slot.file_name())) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let id = Path::new(raw.trim())
            .file_name()
            .map(|name| EntryId::from(name.to_string_lossy().as_ref()));
        Ok(id)
    }
}
