//! One entry point per command: wires the catalog, runner and components
//! together for a single invocation.

use crate::catalog::{BackupEntry, Catalog, EntryId, EntryKind, ListFilter};
use crate::chain::{Chain, ChainResolver};
use crate::config::Config;
use crate::executor::binlog::BinlogArchiver;
use crate::executor::{now_seconds, BackupExecutor, CaptureKind};
use crate::pitr::{PitrCoordinator, PitrReport, PitrRequest};
use crate::prepare::PrepareEngine;
use crate::restore::{Confirmer, RestoreCoordinator};
use crate::retention::{RetentionManager, RetentionReport};
use crate::tool::{ClientAuth, CommandRunner};
use crate::utils::errors::Result;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupType {
    Full,
    Incremental,
    Binlog,
}

pub struct Orchestrator<'a, R: CommandRunner> {
    config: &'a Config,
    catalog: &'a dyn Catalog,
    runner: &'a R,
    auth: &'a ClientAuth,
    confirmer: &'a dyn Confirmer,
}

impl<'a, R: CommandRunner> Orchestrator<'a, R> {
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

    /// Capture, then apply retention. Returns `None` in dry-run mode.
    ///
    /// Retention problems are logged; they never fail a recorded capture.
    pub async fn backup(&self, kind: BackupType) -> Result<Option<BackupEntry>> {
        let entry = match kind {
            BackupType::Full => self.executor().capture(CaptureKind::Full).await?,
            BackupType::Incremental => self.executor().capture(CaptureKind::Incremental).await?,
            BackupType::Binlog => {
                BinlogArchiver::new(self.config, self.catalog, self.runner, self.auth)
                    .capture()
                    .await?
            }
        };

        match self.prune() {
            Ok(report) if !report.failed.is_empty() => {
                warn!(failed = report.failed.len(), "Some expired entries could not be removed");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Retention failed after capture"),
        }
        Ok(entry)
    }

    /// Resolve, prepare and restore `target` (the newest backup when absent).
    pub async fn restore(&self, target: Option<EntryId>) -> Result<Chain> {
        let resolver = ChainResolver::new(self.catalog);
        let target = match target {
            Some(id) => id,
            None => resolver.latest_target()?,
        };
        let chain = resolver.resolve(&target)?;
        info!(target = %target, chain = ?chain.ids(), "Restoring chain");

        PrepareEngine::new(self.config, self.catalog, self.runner, self.auth)
            .run(&chain)
            .await?;
        RestoreCoordinator::new(self.config, self.catalog, self.runner, self.auth, self.confirmer)
            .restore(&chain)
            .await?;
        Ok(chain)
    }

    pub async fn pitr(&self, request: &PitrRequest) -> Result<PitrReport> {
        PitrCoordinator::new(self.config, self.catalog, self.runner, self.auth, self.confirmer)
            .run(request)
            .await
    }

    pub fn list(&self, kind: Option<EntryKind>) -> Result<Vec<BackupEntry>> {
        self.catalog.list(&ListFilter {
            kind,
            ..ListFilter::default()
        })
    }

    pub fn prune(&self) -> Result<RetentionReport> {
        RetentionManager::new(self.catalog, &self.config.retention, self.config.run.dry_run).apply(now_seconds())
    }

    fn executor(&self) -> BackupExecutor<'_, R> {
        BackupExecutor::new(self.config, self.catalog, self.runner, self.auth)
    }
}
