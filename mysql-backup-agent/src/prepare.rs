//! Prepare sequencing: merges a resolved chain into the full backup's
//! directory so it can be copied back.
//!
//! Every element but the last is applied with `--apply-log-only`; the last
//! one gets the final apply. Applying redo is one-way, so a directory that
//! was already prepared is refused rather than merged a second time.

use crate::catalog::{BackupEntry, Catalog, EntryId, EntryState};
use crate::chain::Chain;
use crate::config::Config;
use crate::tool::xtrabackup::{Checkpoints, PrepareMode, XtraBackup};
use crate::tool::{run_checked, ClientAuth, CommandRunner, ToolCommand};
use crate::utils::errors::{OrchestratorError, Result};
use crate::utils::format::format_duration;
use std::path::PathBuf;
use tracing::info;

/// One chain element's work, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareStep {
    pub entry: EntryId,
    pub decrypt: bool,
    pub decompress: bool,
    /// `None` for the full backup itself
    pub incremental_dir: Option<PathBuf>,
    pub mode: PrepareMode,
}

pub struct PrepareEngine<'a, R: CommandRunner> {
    config: &'a Config,
    catalog: &'a dyn Catalog,
    runner: &'a R,
    auth: &'a ClientAuth,
}

impl<'a, R: CommandRunner> PrepareEngine<'a, R> {
    pub fn new(config: &'a Config, catalog: &'a dyn Catalog, runner: &'a R, auth: &'a ClientAuth) -> Self {
        Self {
            config,
            catalog,
            runner,
            auth,
        }
    }

    pub fn plan(chain: &Chain) -> Vec<PrepareStep> {
        let last = chain.len().saturating_sub(1);
        chain
            .entries()
            .iter()
            .enumerate()
            .map(|(i, entry)| PrepareStep {
                entry: entry.id.clone(),
                decrypt: entry.encrypted,
                decompress: entry.compressed,
                incremental_dir: (i > 0).then(|| entry.path.clone()),
                mode: if i == last {
                    PrepareMode::Final
                } else {
                    PrepareMode::ApplyLogOnly
                },
            })
            .collect()
    }

    pub async fn run(&self, chain: &Chain) -> Result<()> {
        let full = chain.full();
        self.ensure_unprepared(full)?;

        let started = std::time::Instant::now();
        let steps = Self::plan(chain);
        let total = steps.len();
        let xtrabackup = XtraBackup::new(self.config, self.auth);

        for (i, (step, element)) in steps.iter().zip(chain.entries()).enumerate() {
            info!(
                entry = %step.entry,
                position = i + 1,
                total,
                mode = ?step.mode,
                "Preparing chain element"
            );

            let mut commands: Vec<ToolCommand> = Vec::new();
            if step.decrypt {
                commands.push(xtrabackup.decrypt(&element.path));
            }
            if step.decompress {
                commands.push(xtrabackup.decompress(&element.path));
            }
            commands.push(xtrabackup.prepare(&full.path, step.incremental_dir.as_deref(), step.mode));

            for cmd in &commands {
                run_checked(self.runner, cmd)
                    .await
                    .map_err(|e| OrchestratorError::PrepareFailed {
                        entry: step.entry.to_string(),
                        source: Box::new(e),
                    })?;
            }
        }

        if !self.config.run.dry_run {
            self.catalog.update_state(&full.id, EntryState::Prepared)?;
            let target = chain.target();
            if target.id != full.id {
                self.catalog.update_state(&target.id, EntryState::Prepared)?;
            }
        }

        info!(
            full = %full.id,
            target = %chain.target().id,
            elements = total,
            duration = %format_duration(started.elapsed().as_secs()),
            "Chain prepared"
        );
        Ok(())
    }

    fn ensure_unprepared(&self, full: &BackupEntry) -> Result<()> {
        if matches!(full.state, EntryState::Prepared | EntryState::Restored) {
            return Err(OrchestratorError::AlreadyPrepared(full.id.to_string()));
        }
        if let Some(checkpoints) = Checkpoints::read(&full.path)? {
            if checkpoints.is_prepared() {
                return Err(OrchestratorError::AlreadyPrepared(full.id.to_string()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FsCatalog;
    use crate::chain::ChainResolver;
    use crate::executor::{BackupExecutor, CaptureKind};
    use crate::testing::{ts, FakeRunner};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        config: Config,
        catalog: FsCatalog,
        auth: ClientAuth,
    }

    fn fixture(customize: impl FnOnce(&mut Config)) -> Fixture {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.backup.backup_dir = dir.path().to_path_buf();
        config.lock.enabled = false;
        customize(&mut config);
        let catalog = FsCatalog::open(dir.path()).unwrap();
        let auth = ClientAuth::from_config(&config.connection).unwrap();
        Fixture {
            _dir: dir,
            config,
            catalog,
            auth,
        }
    }

    /// Full at t0 plus `incrementals` hourly incrementals; returns the last captured entry.
    async fn capture_chain(fx: &Fixture, incrementals: i64) -> Result<BackupEntry> {
        let runner = FakeRunner::new();
        let executor = BackupExecutor::new(&fx.config, &fx.catalog, &runner, &fx.auth);
        let mut last = executor.capture_at(CaptureKind::Full, ts(0)).await?.unwrap();
        for hour in 1..=incrementals {
            last = executor
                .capture_at(CaptureKind::Incremental, ts(hour))
                .await?
                .unwrap();
        }
        Ok(last)
    }

    #[tokio::test]
    async fn test_prepare_order_and_modes() -> Result<()> {
        let fx = fixture(|_| {});
        let target = capture_chain(&fx, 2).await?;
        let chain = ChainResolver::new(&fx.catalog).resolve(&target.id)?;

        let runner = FakeRunner::new();
        PrepareEngine::new(&fx.config, &fx.catalog, &runner, &fx.auth)
            .run(&chain)
            .await?;

        let cmds = runner.commands();
        assert_eq!(cmds.len(), 3);
        let full_dir = format!("--target-dir={}", chain.full().path.display());
        assert!(cmds.iter().all(|c| c.has_arg("--prepare") && c.has_arg(&full_dir)));
        assert!(cmds[0].has_arg("--apply-log-only"));
        assert!(!cmds[0].args.iter().any(|a| a.starts_with("--incremental-dir=")));
        assert!(cmds[1].has_arg("--apply-log-only"));
        assert!(cmds[1].has_arg(&format!("--incremental-dir={}", chain.entries()[1].path.display())));
        assert!(!cmds[2].has_arg("--apply-log-only"));
        assert!(cmds[2].has_arg(&format!("--incremental-dir={}", target.path.display())));

        assert_eq!(fx.catalog.get(&chain.full().id)?.state, EntryState::Prepared);
        assert_eq!(fx.catalog.get(&target.id)?.state, EntryState::Prepared);
        assert_eq!(fx.catalog.get(&chain.entries()[1].id)?.state, EntryState::Verified);
        Ok(())
    }

    #[tokio::test]
    async fn test_single_full_gets_final_apply() -> Result<()> {
        let fx = fixture(|_| {});
        let full = capture_chain(&fx, 0).await?;
        let chain = ChainResolver::new(&fx.catalog).resolve(&full.id)?;

        let steps = PrepareEngine::<FakeRunner>::plan(&chain);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].mode, PrepareMode::Final);
        assert_eq!(steps[0].incremental_dir, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_second_run_is_rejected() -> Result<()> {
        let fx = fixture(|_| {});
        let target = capture_chain(&fx, 1).await?;
        let resolver = ChainResolver::new(&fx.catalog);
        let runner = FakeRunner::new();
        let engine = PrepareEngine::new(&fx.config, &fx.catalog, &runner, &fx.auth);

        engine.run(&resolver.resolve(&target.id)?).await?;
        let issued = runner.commands().len();

        let again = engine.run(&resolver.resolve(&target.id)?).await;
        assert!(matches!(again, Err(OrchestratorError::AlreadyPrepared(_))));
        assert_eq!(runner.commands().len(), issued);
        Ok(())
    }

    #[tokio::test]
    async fn test_prepared_checkpoints_are_rejected_without_sidecar_state() -> Result<()> {
        let fx = fixture(|_| {});
        let target = capture_chain(&fx, 1).await?;
        let chain = ChainResolver::new(&fx.catalog).resolve(&target.id)?;
        std::fs::write(
            chain.full().path.join(crate::tool::xtrabackup::CHECKPOINTS_FILE),
            "backup_type = log-applied\nfrom_lsn = 0\nto_lsn = 100\n",
        )?;

        let runner = FakeRunner::new();
        let result = PrepareEngine::new(&fx.config, &fx.catalog, &runner, &fx.auth)
            .run(&chain)
            .await;
        assert!(matches!(result, Err(OrchestratorError::AlreadyPrepared(_))));
        assert!(runner.commands().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_encrypted_compressed_elements_are_unpacked_first() -> Result<()> {
        let fx = fixture(|c| {
            c.backup.compress = true;
            c.backup.encrypt_key_file = Some(PathBuf::from("/etc/backup/key"));
        });
        let target = capture_chain(&fx, 1).await?;
        let chain = ChainResolver::new(&fx.catalog).resolve(&target.id)?;

        let runner = FakeRunner::new();
        PrepareEngine::new(&fx.config, &fx.catalog, &runner, &fx.auth)
            .run(&chain)
            .await?;

        let steps = runner.steps();
        let kinds: Vec<&str> = steps
            .iter()
            .map(|s| s.split_whitespace().next().unwrap_or_default())
            .collect();
        assert_eq!(
            kinds,
            vec!["decrypt", "decompress", "prepare", "decrypt", "decompress", "prepare"]
        );
        assert!(steps[3].contains(&target.path.display().to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn test_failure_names_the_element_and_stops() -> Result<()> {
        let fx = fixture(|_| {});
        let target = capture_chain(&fx, 2).await?;
        let chain = ChainResolver::new(&fx.catalog).resolve(&target.id)?;
        let middle = chain.entries()[1].clone();

        let runner = FakeRunner::new().fail_step_containing(&middle.path.display().to_string());
        let result = PrepareEngine::new(&fx.config, &fx.catalog, &runner, &fx.auth)
            .run(&chain)
            .await;

        match result {
            Err(OrchestratorError::PrepareFailed { entry, source }) => {
                assert_eq!(entry, middle.id.to_string());
                assert!(matches!(*source, OrchestratorError::ToolInvocationFailed { .. }));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(runner.commands().len(), 2);
        assert_eq!(fx.catalog.get(&chain.full().id)?.state, EntryState::Verified);
        Ok(())
    }
}
