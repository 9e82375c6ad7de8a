//! Backup entry types and the sidecar record persisted next to each payload.
//!
//! The sidecar is serialized as `.backup-meta.json` inside every entry
//! directory and is the only source of typed metadata; payload files written
//! by the backup tool are never re-parsed to recover flags.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// File name of the sidecar record inside an entry directory.
pub const SIDECAR_FILE: &str = ".backup-meta.json";

/// Timestamp layout used in entry directory names.
pub const ID_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Full,
    Incremental,
    BinlogSet,
    /// Payload present but sidecar missing or unreadable
    Unknown,
}

impl EntryKind {
    /// Directory name prefix for this kind.
    pub fn prefix(&self) -> Option<&'static str> {
        match self {
            EntryKind::Full => Some("full"),
            EntryKind::Incremental => Some("incr"),
            EntryKind::BinlogSet => Some("binlogs"),
            EntryKind::Unknown => None,
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "full" => Some(EntryKind::Full),
            "incr" => Some(EntryKind::Incremental),
            "binlogs" => Some(EntryKind::BinlogSet),
            _ => None,
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntryKind::Full => "full",
            EntryKind::Incremental => "incremental",
            EntryKind::BinlogSet => "binlog",
            EntryKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Lifecycle of an entry. `Prepared` and `Restored` are only reached along
/// the restore path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Captured,
    Verified,
    Prepared,
    Restored,
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntryState::Captured => "captured",
            EntryState::Verified => "verified",
            EntryState::Prepared => "prepared",
            EntryState::Restored => "restored",
        };
        f.write_str(name)
    }
}

/// Entry identifier: the entry's directory name, e.g. `incr_20260301120000`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(String);

impl EntryId {
    pub fn new(kind: EntryKind, created_at: NaiveDateTime) -> Option<Self> {
        let prefix = kind.prefix()?;
        Some(Self(format!(
            "{}_{}",
            prefix,
            created_at.format(ID_TIMESTAMP_FORMAT)
        )))
    }

    /// Parse a directory name following the `<prefix>_<YYYYMMDDHHMMSS>` convention.
    pub fn parse(name: &str) -> Option<(Self, EntryKind, NaiveDateTime)> {
        let (prefix, stamp) = name.split_once('_')?;
        let kind = EntryKind::from_prefix(prefix)?;
        if stamp.len() != 14 || !stamp.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let created_at = NaiveDateTime::parse_from_str(stamp, ID_TIMESTAMP_FORMAT).ok()?;
        Some((Self(name.to_string()), kind, created_at))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntryId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// One capture unit as seen by the rest of the agent.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupEntry {
    pub id: EntryId,
    pub kind: EntryKind,
    pub path: PathBuf,
    pub created_at: NaiveDateTime,
    /// Entry this incremental was taken against
    pub base_id: Option<EntryId>,
    pub compressed: bool,
    pub encrypted: bool,
    pub state: EntryState,
    pub size_bytes: u64,
    /// Rough number of events in a binary-log set
    pub statement_count_estimate: Option<u64>,
}

impl BackupEntry {
    /// Entry whose sidecar could not be read. Listed, never chained or evicted.
    pub fn degraded(id: EntryId, path: PathBuf, created_at: NaiveDateTime) -> Self {
        Self {
            id,
            kind: EntryKind::Unknown,
            path,
            created_at,
            base_id: None,
            compressed: false,
            encrypted: false,
            state: EntryState::Captured,
            size_bytes: 0,
            statement_count_estimate: None,
        }
    }
}

/// Sidecar record, serialized as `.backup-meta.json` in each entry directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub kind: EntryKind,
    pub created_at: NaiveDateTime,
    pub size_bytes: u64,
    pub size_human: String,
    pub compressed: bool,
    pub encrypted: bool,
    pub state: EntryState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_id: Option<EntryId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement_count_estimate: Option<u64>,
}

impl EntryMetadata {
    pub fn from_entry(entry: &BackupEntry, base_path: Option<PathBuf>) -> Self {
        Self {
            kind: entry.kind,
            created_at: entry.created_at,
            size_bytes: entry.size_bytes,
            size_human: crate::utils::format::format_bytes(entry.size_bytes),
            compressed: entry.compressed,
            encrypted: entry.encrypted,
            state: entry.state,
            base_id: entry.base_id.clone(),
            base_path,
            statement_count_estimate: entry.statement_count_estimate,
        }
    }

    pub fn into_entry(self, id: EntryId, path: PathBuf) -> BackupEntry {
        BackupEntry {
            id,
            kind: self.kind,
            path,
            created_at: self.created_at,
            base_id: self.base_id,
            compressed: self.compressed,
            encrypted: self.encrypted,
            state: self.state,
            size_bytes: self.size_bytes,
            statement_count_estimate: self.statement_count_estimate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(12, 30, 5)
            .unwrap()
    }

    #[test]
    fn test_entry_id_naming() {
        let id = EntryId::new(EntryKind::Incremental, ts()).unwrap();
        assert_eq!(id.as_str(), "incr_20260301123005");
        assert!(EntryId::new(EntryKind::Unknown, ts()).is_none());
    }

    #[test]
    fn test_entry_id_parse() {
        let (id, kind, created_at) = EntryId::parse("binlogs_20260301123005").unwrap();
        assert_eq!(id.as_str(), "binlogs_20260301123005");
        assert_eq!(kind, EntryKind::BinlogSet);
        assert_eq!(created_at, ts());

        assert!(EntryId::parse("full_2026").is_none());
        assert!(EntryId::parse("snapshot_20260301123005").is_none());
        assert!(EntryId::parse(".last_full").is_none());
    }

    #[test]
    fn test_ids_sort_chronologically_within_kind() {
        let a = EntryId::parse("full_20260101000000").unwrap().0;
        let b = EntryId::parse("full_20260102000000").unwrap().0;
        assert!(a < b);
    }
}
