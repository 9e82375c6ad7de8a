//! Chain resolution: which entries must be merged to rebuild a target.
//!
//! A chain is one full backup followed by zero or more incrementals, each
//! taken against its predecessor, ending at the requested target. Gaps and
//! timestamp ties are reported, never repaired. Incrementals that never passed
//! verification are not part of any chain.

use crate::catalog::{BackupEntry, Catalog, EntryId, EntryKind, EntryState, ListFilter, PointerSlot};
use crate::utils::errors::{OrchestratorError, Result};
use tracing::debug;

/// Ordered `[full, incr₁, …, incrₙ]`; the last element is the restore target.
#[derive(Debug, Clone, PartialEq)]
pub struct Chain {
    entries: Vec<BackupEntry>,
}

impl Chain {
    pub fn full(&self) -> &BackupEntry {
        &self.entries[0]
    }

    pub fn target(&self) -> &BackupEntry {
        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> &[BackupEntry] {
        &self.entries
    }

    pub fn ids(&self) -> Vec<EntryId> {
        self.entries.iter().map(|e| e.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct ChainResolver<'a> {
    catalog: &'a dyn Catalog,
}

impl<'a> ChainResolver<'a> {
    pub fn new(catalog: &'a dyn Catalog) -> Self {
        Self { catalog }
    }

    pub fn resolve(&self, target_id: &EntryId) -> Result<Chain> {
        let target = self.catalog.get(target_id)?;
        let broken = |reason: String| OrchestratorError::ChainBroken {
            target: target_id.to_string(),
            reason,
        };

        match target.kind {
            EntryKind::Full => {
                return Ok(Chain {
                    entries: vec![target],
                })
            }
            EntryKind::Incremental => {}
            other => {
                return Err(broken(format!("a {} entry cannot be restored", other)));
            }
        }

        let full_id = self
            .catalog
            .get_pointer(PointerSlot::LastFull)?
            .ok_or_else(|| broken("no last full backup is recorded".into()))?;
        let full = match self.catalog.get(&full_id) {
            Ok(full) if full.kind == EntryKind::Full => full,
            Ok(_) => return Err(broken(format!("{} is not a readable full backup", full_id))),
            Err(OrchestratorError::NotFound(_)) => {
                return Err(broken(format!("last full backup {} is missing", full_id)))
            }
            Err(e) => return Err(e),
        };
        if target.state == EntryState::Captured {
            return Err(broken("target was never verified".into()));
        }
        if target.created_at < full.created_at {
            return Err(broken(format!(
                "target predates the last full backup {}",
                full.id
            )));
        }

        let mut incrementals: Vec<BackupEntry> = self
            .catalog
            .list(&ListFilter::kind(EntryKind::Incremental))?
            .into_iter()
            .filter(|e| e.created_at >= full.created_at && e.created_at <= target.created_at)
            .filter(|e| {
                let verified = e.state != EntryState::Captured;
                if !verified {
                    debug!(entry = %e.id, "Skipping unverified incremental");
                }
                verified
            })
            .collect();
        incrementals.sort_by_key(|e| e.created_at);

        let tie = incrementals
            .iter()
            .find(|e| e.created_at == full.created_at)
            .map(|e| e.created_at)
            .or_else(|| {
                incrementals
                    .windows(2)
                    .find(|pair| pair[0].created_at == pair[1].created_at)
                    .map(|pair| pair[0].created_at)
            });
        if let Some(created_at) = tie {
            return Err(OrchestratorError::AmbiguousChain {
                target: target_id.to_string(),
                created_at: created_at.to_string(),
            });
        }

        let mut entries = Vec::with_capacity(incrementals.len() + 1);
        entries.push(full);
        for incr in incrementals {
            let previous = &entries[entries.len() - 1];
            if incr.base_id.as_ref() != Some(&previous.id) {
                return Err(broken(format!(
                    "{} was taken against {} but follows {}",
                    incr.id,
                    incr.base_id
                        .as_ref()
                        .map(|b| b.to_string())
                        .unwrap_or_else(|| "nothing".into()),
                    previous.id
                )));
            }
            entries.push(incr);
        }

        if entries[entries.len() - 1].id != target.id {
            return Err(broken("target is not reachable from the last full backup".into()));
        }

        debug!(target = %target_id, length = entries.len(), "Resolved backup chain");
        Ok(Chain { entries })
    }

    /// Default restore target: the last incremental when it is newer than
    /// the last full, otherwise the last full.
    pub fn latest_target(&self) -> Result<EntryId> {
        let full_id = self
            .catalog
            .get_pointer(PointerSlot::LastFull)?
            .ok_or(OrchestratorError::NoFullBackup)?;
        let full = self.catalog.get(&full_id)?;

        if let Some(incr_id) = self.catalog.get_pointer(PointerSlot::LastIncremental)? {
            if let Ok(incr) = self.catalog.get(&incr_id) {
                if incr.created_at > full.created_at {
                    return Ok(incr_id);
                }
            }
        }
        Ok(full_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FsCatalog;
    use chrono::{NaiveDate, NaiveDateTime};
    use tempfile::TempDir;

    fn ts(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn add(catalog: &FsCatalog, kind: EntryKind, hour: u32, base: Option<&EntryId>) -> EntryId {
        let (id, path) = catalog.allocate(kind, ts(hour)).unwrap();
        catalog
            .record(&BackupEntry {
                id: id.clone(),
                kind,
                path,
                created_at: ts(hour),
                base_id: base.cloned(),
                compressed: false,
                encrypted: false,
                state: EntryState::Verified,
                size_bytes: 0,
                statement_count_estimate: None,
            })
            .unwrap();
        id
    }

    fn setup() -> (TempDir, FsCatalog, Vec<EntryId>) {
        let dir = TempDir::new().unwrap();
        let catalog = FsCatalog::open(dir.path()).unwrap();
        let full = add(&catalog, EntryKind::Full, 0, None);
        catalog.set_pointer(PointerSlot::LastFull, &full).unwrap();
        let mut ids = vec![full];
        for hour in 1..=4 {
            let base = ids[ids.len() - 1].clone();
            ids.push(add(&catalog, EntryKind::Incremental, hour, Some(&base)));
        }
        (dir, catalog, ids)
    }

    #[test]
    fn test_full_target_is_single_element_chain() {
        let (_dir, catalog, ids) = setup();
        let chain = ChainResolver::new(&catalog).resolve(&ids[0]).unwrap();
        assert_eq!(chain.ids(), vec![ids[0].clone()]);
    }

    #[test]
    fn test_incremental_chain_in_order() {
        let (_dir, catalog, ids) = setup();
        let resolver = ChainResolver::new(&catalog);

        assert_eq!(resolver.resolve(&ids[4]).unwrap().ids(), ids);
        assert_eq!(resolver.resolve(&ids[2]).unwrap().ids(), ids[..3].to_vec());
    }

    #[test]
    fn test_gap_breaks_chain() {
        let (_dir, catalog, ids) = setup();
        catalog.remove(&ids[2]).unwrap();
        let resolver = ChainResolver::new(&catalog);

        for target in &ids[3..] {
            assert!(matches!(
                resolver.resolve(target),
                Err(OrchestratorError::ChainBroken { .. })
            ));
        }
        // Entries before the gap still resolve
        assert_eq!(resolver.resolve(&ids[1]).unwrap().len(), 2);
    }

    #[test]
    fn test_identical_timestamps_are_ambiguous() {
        let dir = TempDir::new().unwrap();
        let catalog = FsCatalog::open(dir.path()).unwrap();
        let full = add(&catalog, EntryKind::Full, 0, None);
        catalog.set_pointer(PointerSlot::LastFull, &full).unwrap();
        let first = add(&catalog, EntryKind::Incremental, 1, Some(&full));
        let second = add(&catalog, EntryKind::Incremental, 2, Some(&full));

        // Same creation time recorded for both, as a coarse clock would produce
        let mut entry = catalog.get(&second).unwrap();
        entry.created_at = ts(1);
        catalog.record(&entry).unwrap();

        let result = ChainResolver::new(&catalog).resolve(&first);
        assert!(matches!(result, Err(OrchestratorError::AmbiguousChain { .. })));
    }

    #[test]
    fn test_missing_last_full_pointer() {
        let dir = TempDir::new().unwrap();
        let catalog = FsCatalog::open(dir.path()).unwrap();
        let full = add(&catalog, EntryKind::Full, 0, None);
        let incr = add(&catalog, EntryKind::Incremental, 1, Some(&full));

        let result = ChainResolver::new(&catalog).resolve(&incr);
        assert!(matches!(result, Err(OrchestratorError::ChainBroken { .. })));
    }

    #[test]
    fn test_latest_target_prefers_newer_incremental() {
        let (_dir, catalog, ids) = setup();
        let resolver = ChainResolver::new(&catalog);
        assert_eq!(resolver.latest_target().unwrap(), ids[0]);

        catalog.set_pointer(PointerSlot::LastIncremental, &ids[3]).unwrap();
        assert_eq!(resolver.latest_target().unwrap(), ids[3]);

        let empty_dir = TempDir::new().unwrap();
        let empty = FsCatalog::open(empty_dir.path()).unwrap();
        assert!(matches!(
            ChainResolver::new(&empty).latest_target(),
            Err(OrchestratorError::NoFullBackup)
        ));
    }

    #[test]
    fn test_binlog_set_is_not_a_restore_target() {
        let (_dir, catalog, _ids) = setup();
        let binlogs = add(&catalog, EntryKind::BinlogSet, 5, None);
        assert!(ChainResolver::new(&catalog).resolve(&binlogs).is_err());
    }

    #[test]
    fn test_unverified_incremental_is_left_out_of_the_chain() {
        let dir = TempDir::new().unwrap();
        let catalog = FsCatalog::open(dir.path()).unwrap();
        let full = add(&catalog, EntryKind::Full, 0, None);
        catalog.set_pointer(PointerSlot::LastFull, &full).unwrap();
        let i1 = add(&catalog, EntryKind::Incremental, 1, Some(&full));
        let failed = add(&catalog, EntryKind::Incremental, 2, Some(&i1));
        catalog.update_state(&failed, EntryState::Captured).unwrap();
        let i3 = add(&catalog, EntryKind::Incremental, 3, Some(&i1));

        let resolver = ChainResolver::new(&catalog);
        assert_eq!(resolver.resolve(&i3).unwrap().ids(), vec![full, i1, i3]);
        assert!(matches!(
            resolver.resolve(&failed),
            Err(OrchestratorError::ChainBroken { .. })
        ));
    }

    #[test]
    fn test_incremental_sharing_the_full_timestamp_is_ambiguous() {
        let dir = TempDir::new().unwrap();
        let catalog = FsCatalog::open(dir.path()).unwrap();
        let full = add(&catalog, EntryKind::Full, 0, None);
        catalog.set_pointer(PointerSlot::LastFull, &full).unwrap();
        let twin = add(&catalog, EntryKind::Incremental, 0, Some(&full));
        let next = add(&catalog, EntryKind::Incremental, 1, Some(&twin));

        let resolver = ChainResolver::new(&catalog);
        for target in [&twin, &next] {
            assert!(matches!(
                resolver.resolve(target),
                Err(OrchestratorError::AmbiguousChain { .. })
            ));
        }
    }
}
