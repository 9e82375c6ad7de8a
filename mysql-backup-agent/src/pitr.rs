//! Point-in-time recovery: restore a chain, then replay archived binary logs
//! up to a stop time.
//!
//! Replay uses the newest binlog set only. When a restore precedes it, the
//! restored backup's recorded log position decides where replay starts.

use crate::catalog::{BackupEntry, Catalog, EntryId, EntryKind, ListFilter};
use crate::chain::{Chain, ChainResolver};
use crate::config::Config;
use crate::executor::binlog::segments;
use crate::prepare::PrepareEngine;
use crate::restore::{Confirmer, RestoreCoordinator};
use crate::tool::mysql::{parse_error_line, MysqlClient, DISABLE_BINLOG_DIRECTIVE};
use crate::tool::xtrabackup::BinlogPosition;
use crate::tool::{run_checked, ClientAuth, CommandRunner};
use crate::utils::errors::{OrchestratorError, Result};
use crate::utils::format::format_bytes;
use chrono::NaiveDateTime;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct PitrRequest {
    /// Events committed after this instant are not replayed
    pub stop_at: NaiveDateTime,
    /// Restore target; the newest backup when absent
    pub target: Option<EntryId>,
    /// Replay onto the running server without restoring first
    pub pitr_only: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PitrReport {
    pub restored: Option<EntryId>,
    pub binlog_set: EntryId,
    pub segments_read: usize,
    pub segments_skipped: usize,
    pub replayed_bytes: usize,
}

pub struct PitrCoordinator<'a, R: CommandRunner> {
    config: &'a Config,
    catalog: &'a dyn Catalog,
    runner: &'a R,
    auth: &'a ClientAuth,
    confirmer: &'a dyn Confirmer,
}

impl<'a, R: CommandRunner> PitrCoordinator<'a, R> {
    pub fn new(
        config: &'a Config,
        catalog: &'a dyn Catalog,
        runner: &'a R,
        auth: &'a ClientAuth,
        confirmer: &'a dyn Confirmer,
    ) -> Self {
        Self {
            config,
            catalog,
            runner,
            auth,
            confirmer,
        }
    }

    pub async fn run(&self, request: &PitrRequest) -> Result<PitrReport> {
        info!(stop_at = %request.stop_at, pitr_only = request.pitr_only, "Starting point-in-time recovery");

        let mut restored = None;
        let mut start = None;
        if !request.pitr_only {
            let chain = self.restore(request.target.as_ref()).await?;
            start = restored_position(&chain)?;
            restored = Some(chain.target().id.clone());
        }

        let set = self
            .catalog
            .list(&ListFilter::kind(EntryKind::BinlogSet))?
            .pop()
            .ok_or(OrchestratorError::NoBinlogSet)?;
        let all_segments = segments(&set.path)?;
        let (selected, start_segment) = self.select_segments(&set, all_segments.clone(), start.as_ref())?;
        info!(
            binlog_set = %set.id,
            selected = selected.len(),
            skipped = all_segments.len() - selected.len(),
            "Reading archived binary logs"
        );

        let client = MysqlClient::new(self.config, self.auth);
        let mut buffer = Vec::new();
        for segment in &selected {
            let position = match (&start_segment, &start) {
                (Some(first), Some(pos)) if first == segment => Some(pos.position),
                _ => None,
            };
            let cmd = client.binlog_dump(segment, Some(request.stop_at), position);
            let output = run_checked(self.runner, &cmd).await?;
            buffer.extend_from_slice(&output.stdout);
        }

        let report = PitrReport {
            restored,
            binlog_set: set.id.clone(),
            segments_read: selected.len(),
            segments_skipped: all_segments.len() - selected.len(),
            replayed_bytes: buffer.len(),
        };

        if buffer.iter().all(u8::is_ascii_whitespace) {
            info!(stop_at = %request.stop_at, "No binary-log events before stop time, nothing to replay");
            return Ok(PitrReport {
                replayed_bytes: 0,
                ..report
            });
        }

        let mut script = DISABLE_BINLOG_DIRECTIVE.as_bytes().to_vec();
        script.extend_from_slice(&buffer);
        let output = self
            .runner
            .run(&client.batch("replay binary logs", script))
            .await?;
        if !output.success() {
            let message = output
                .stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("client exited without a message")
                .to_string();
            return Err(OrchestratorError::ReplayFailed {
                line: parse_error_line(&output.stderr),
                message,
            });
        }

        info!(
            binlog_set = %set.id,
            size = %format_bytes(report.replayed_bytes as u64),
            stop_at = %request.stop_at,
            "Binary logs replayed"
        );
        Ok(report)
    }

    async fn restore(&self, target: Option<&EntryId>) -> Result<Chain> {
        let resolver = ChainResolver::new(self.catalog);
        let target = match target {
            Some(id) => id.clone(),
            None => resolver.latest_target()?,
        };
        let chain = resolver.resolve(&target)?;

        PrepareEngine::new(self.config, self.catalog, self.runner, self.auth)
            .run(&chain)
            .await?;
        RestoreCoordinator::new(self.config, self.catalog, self.runner, self.auth, self.confirmer)
            .restore(&chain)
            .await?;
        Ok(chain)
    }

    /// Segments to replay and, when a start position applies, the segment it belongs to.
    fn select_segments(
        &self,
        set: &BackupEntry,
        all: Vec<PathBuf>,
        start: Option<&BinlogPosition>,
    ) -> Result<(Vec<PathBuf>, Option<PathBuf>)> {
        let Some(start) = start else {
            return Ok((all, None));
        };
        let name_of = |p: &PathBuf| {
            p.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        };

        if let Some(first) = all.iter().find(|p| name_of(p) == start.file).cloned() {
            let selected = all.into_iter().filter(|p| name_of(p) >= start.file).collect();
            return Ok((selected, Some(first)));
        }

        if all.iter().all(|p| name_of(p) < start.file) {
            warn!(
                binlog_set = %set.id,
                file = %start.file,
                "Binary-log archive ends before the restored backup position"
            );
            return Ok((Vec::new(), None));
        }

        let gap = OrchestratorError::BinlogCoverageGap(format!(
            "{} does not contain {} (restored backup position {})",
            set.id, start.file, start.position
        ));
        if self.config.run.ignore_errors {
            warn!(error = %gap, "Replaying the whole archive anyway");
            Ok((all, None))
        } else {
            Err(gap)
        }
    }
}

/// Log coordinates recorded with the restored data: the target's own, or
/// those the prepare step left in the full backup's directory.
fn restored_position(chain: &Chain) -> Result<Option<BinlogPosition>> {
    if let Some(position) = BinlogPosition::read(&chain.target().path)? {
        return Ok(Some(position));
    }
    let position = BinlogPosition::read(&chain.full().path)?;
    if position.is_none() {
        warn!(target = %chain.target().id, "Backup has no recorded binary-log position, replaying the whole archive");
    }
    Ok(position)
}
