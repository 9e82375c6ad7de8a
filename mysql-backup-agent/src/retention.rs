//! Age and count eviction over each entry kind.
//!
//! Entries referenced by the `lastFull` / `lastIncremental` pointers are never
//! evicted, and neither are the incrementals `lastIncremental` is built on.
//! Exempt entries still count toward a kind's total.

use crate::catalog::{BackupEntry, Catalog, EntryId, EntryKind, ListFilter, PointerSlot};
use crate::config::RetentionConfig;
use crate::utils::errors::{OrchestratorError, Result};
use crate::utils::format::format_bytes;
use chrono::{Duration, NaiveDateTime};
use std::fmt;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    Age,
    Count,
}

impl fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictionReason::Age => f.write_str("older than retention horizon"),
            EvictionReason::Count => f.write_str("over retention count"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Eviction {
    pub entry: BackupEntry,
    pub reason: EvictionReason,
}

#[derive(Debug, Clone, Default)]
pub struct RetentionReport {
    pub removed: Vec<EntryId>,
    pub failed: Vec<EntryId>,
    pub freed_bytes: u64,
}

pub struct RetentionManager<'a> {
    catalog: &'a dyn Catalog,
    policy: &'a RetentionConfig,
    dry_run: bool,
}

impl<'a> RetentionManager<'a> {
    pub fn new(catalog: &'a dyn Catalog, policy: &'a RetentionConfig, dry_run: bool) -> Self {
        Self {
            catalog,
            policy,
            dry_run,
        }
    }

    /// Entries the policies would remove as of `now`, oldest first per kind.
    pub fn plan(&self, now: NaiveDateTime) -> Result<Vec<Eviction>> {
        let exempt = self.protected()?;

        let mut evictions = Vec::new();
        for (kind, keep) in [
            (EntryKind::Full, self.policy.keep_full),
            (EntryKind::Incremental, self.policy.keep_incremental),
            (EntryKind::BinlogSet, self.policy.keep_binlog),
        ] {
            let partition = self.catalog.list(&ListFilter::kind(kind))?;
            evictions.extend(evict_partition(partition, &exempt, self.policy.max_age_days, keep, now));
        }
        Ok(evictions)
    }

    /// Pointer targets plus every base `lastIncremental` links back through.
    fn protected(&self) -> Result<Vec<EntryId>> {
        let mut exempt = Vec::new();
        if let Some(id) = self.catalog.get_pointer(PointerSlot::LastFull)? {
            exempt.push(id);
        }

        let mut next = self.catalog.get_pointer(PointerSlot::LastIncremental)?;
        while let Some(id) = next {
            if exempt.contains(&id) {
                break;
            }
            next = match self.catalog.get(&id) {
                Ok(entry) => entry.base_id,
                Err(OrchestratorError::NotFound(_)) => None,
                Err(e) => return Err(e),
            };
            exempt.push(id);
        }
        Ok(exempt)
    }

    pub fn apply(&self, now: NaiveDateTime) -> Result<RetentionReport> {
        let plan = self.plan(now)?;
        let mut report = RetentionReport::default();

        if plan.is_empty() {
            debug!("Retention: nothing to remove");
            return Ok(report);
        }

        for eviction in plan {
            let entry = &eviction.entry;
            if self.dry_run {
                info!(entry = %entry.id, reason = %eviction.reason, "Dry run: would remove");
                continue;
            }
            match self.catalog.remove(&entry.id) {
                Ok(()) => {
                    info!(entry = %entry.id, reason = %eviction.reason, size = %format_bytes(entry.size_bytes), "Removed");
                    report.freed_bytes += entry.size_bytes;
                    report.removed.push(entry.id.clone());
                }
                Err(e) => {
                    warn!(entry = %entry.id, error = %e, "Failed to remove entry");
                    report.failed.push(entry.id.clone());
                }
            }
        }

        if !self.dry_run {
            info!(
                removed = report.removed.len(),
                failed = report.failed.len(),
                freed = %format_bytes(report.freed_bytes),
                "Retention applied"
            );
        }
        Ok(report)
    }
}

fn evict_partition(
    partition: Vec<BackupEntry>,
    exempt: &[EntryId],
    max_age_days: Option<u32>,
    keep: Option<usize>,
    now: NaiveDateTime,
) -> Vec<Eviction> {
    let is_exempt = |e: &BackupEntry| exempt.contains(&e.id);
    let horizon = max_age_days.map(|days| now - Duration::days(i64::from(days)));

    let (aged, remaining): (Vec<_>, Vec<_>) = partition
        .into_iter()
        .partition(|e| !is_exempt(e) && horizon.is_some_and(|h| e.created_at < h));

    let mut evictions: Vec<Eviction> = aged
        .into_iter()
        .map(|entry| Eviction {
            entry,
            reason: EvictionReason::Age,
        })
        .collect();

    if let Some(keep) = keep {
        let mut surplus = remaining.len().saturating_sub(keep);
        for entry in remaining {
            if surplus == 0 {
                break;
            }
            if is_exempt(&entry) {
                continue;
            }
            surplus -= 1;
            evictions.push(Eviction {
                entry,
                reason: EvictionReason::Count,
            });
        }
    }

    evictions
}
