//! Restore sequence for a prepared chain.
//!
//! Each step is a hard gate. Nothing is rolled back: a failure after the
//! data directory was cleared leaves it empty or partially populated, and the
//! only recovery is a fresh restore into a clean directory.

use crate::catalog::{Catalog, EntryState};
use crate::chain::Chain;
use crate::config::Config;
use crate::fs::ownership::{chown_recursive, Owner};
use crate::fs::walker::clear_directory;
use crate::tool::mysql::MysqlClient;
use crate::tool::xtrabackup::XtraBackup;
use crate::tool::{run_checked, ClientAuth, CommandRunner, ToolCommand};
use crate::utils::errors::{OrchestratorError, Result};
use std::io::{BufRead, Write};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Asks the operator to approve a destructive action.
pub trait Confirmer {
    fn confirm(&self, prompt: &str) -> Result<bool>;
}

/// Reads the answer from the terminal; only `yes` approves.
pub struct StdinConfirmer;

impl Confirmer for StdinConfirmer {
    fn confirm(&self, prompt: &str) -> Result<bool> {
        let mut stderr = std::io::stderr();
        write!(stderr, "{} Type 'yes' to continue: ", prompt)?;
        stderr.flush()?;

        let mut answer = String::new();
        std::io::stdin().lock().read_line(&mut answer)?;
        Ok(answer.trim() == "yes")
    }
}

fn step_failed(step: &str) -> impl Fn(OrchestratorError) -> OrchestratorError + '_ {
    move |e| OrchestratorError::RestoreFailed {
        step: step.to_string(),
        reason: e.to_string(),
    }
}

pub struct RestoreCoordinator<'a, R: CommandRunner> {
    config: &'a Config,
    catalog: &'a dyn Catalog,
    runner: &'a R,
    auth: &'a ClientAuth,
    confirmer: &'a dyn Confirmer,
}

impl<'a, R: CommandRunner> RestoreCoordinator<'a, R> {
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

    /// Copy the chain's prepared full backup into the server's data directory.
    pub async fn restore(&self, chain: &Chain) -> Result<()> {
        let full = chain.full();
        let data_dir = &self.config.server.data_dir;
        let dry_run = self.config.run.dry_run;

        if !dry_run {
            let state = self.catalog.get(&full.id)?.state;
            if state != EntryState::Prepared {
                return Err(OrchestratorError::RestoreFailed {
                    step: "precondition".into(),
                    reason: format!("{} is {}, expected prepared", full.id, state),
                });
            }
        }

        if !self.config.run.force {
            let prompt = format!(
                "Restoring {} will stop the server and erase {}.",
                chain.target().id,
                data_dir.display()
            );
            if !self.confirmer.confirm(&prompt)? {
                return Err(OrchestratorError::Aborted("restore not confirmed".into()));
            }
        }

        info!(target = %chain.target().id, data_dir = %data_dir.display(), "Starting restore");
        let client = MysqlClient::new(self.config, self.auth);

        self.service("stop server", &self.config.server.stop_command, &client)
            .await?;

        if dry_run {
            info!(data_dir = %data_dir.display(), "Dry run: data directory left untouched");
        } else {
            let removed = clear_directory(data_dir).map_err(|e| step_failed("clear data directory")(e.into()))?;
            info!(removed, data_dir = %data_dir.display(), "Data directory cleared");
        }

        let copy_back = XtraBackup::new(self.config, self.auth).copy_back(&full.path, data_dir);
        run_checked(self.runner, &copy_back)
            .await
            .map_err(step_failed("copy-back"))?;

        match (&self.config.server.data_owner, dry_run) {
            (Some(owner_spec), false) => {
                let owner = Owner::lookup(owner_spec).map_err(|e| step_failed("reset ownership")(e.into()))?;
                let changed =
                    chown_recursive(data_dir, owner).map_err(|e| step_failed("reset ownership")(e.into()))?;
                info!(owner = %owner_spec, changed, "Ownership reset");
            }
            (Some(owner_spec), true) => info!(owner = %owner_spec, "Dry run: ownership left untouched"),
            (None, _) => debug!("No data owner configured, skipping ownership reset"),
        }

        self.service("start server", &self.config.server.start_command, &client)
            .await?;
        self.wait_healthy(&client.ping()).await?;

        if !dry_run {
            self.catalog.update_state(&full.id, EntryState::Restored)?;
            let target = chain.target();
            if target.id != full.id {
                self.catalog.update_state(&target.id, EntryState::Restored)?;
            }
        }

        info!(target = %chain.target().id, "Restore completed");
        Ok(())
    }

    async fn service(&self, step: &str, argv: &[String], client: &MysqlClient<'_>) -> Result<()> {
        let cmd = client.service(step, argv).ok_or_else(|| OrchestratorError::RestoreFailed {
            step: step.to_string(),
            reason: "no command configured".into(),
        })?;
        run_checked(self.runner, &cmd).await.map_err(step_failed(step))?;
        Ok(())
    }

    /// Ping every `health_interval` until the server answers or `health_timeout` passes.
    async fn wait_healthy(&self, ping: &ToolCommand) -> Result<()> {
        let timeout = self.config.server.health_timeout();
        let interval = self.config.server.health_interval();
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match self.runner.run(ping).await {
                Ok(output) if output.success() => {
                    info!(attempts, elapsed_ms = started.elapsed().as_millis() as u64, "Server is healthy");
                    return Ok(());
                }
                Ok(output) => debug!(attempts, status = output.status, "Server not ready yet"),
                Err(e) => warn!(attempts, error = %e, "Health check could not run"),
            }

            if started.elapsed() + interval > timeout {
                return Err(OrchestratorError::RestoreFailed {
                    step: "health check".into(),
                    reason: format!(
                        "server did not answer within {}s ({} attempts)",
                        timeout.as_secs(),
                        attempts
                    ),
                });
            }
            tokio::time::sleep(interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{BackupEntry, FsCatalog};
    use crate::chain::ChainResolver;
    use crate::executor::{BackupExecutor, CaptureKind};
    use crate::prepare::PrepareEngine;
    use crate::testing::{ts, FakeRunner};
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct Answer {
        approve: bool,
        asked: AtomicUsize,
    }

    impl Answer {
        fn new(approve: bool) -> Self {
            Self {
                approve,
                asked: AtomicUsize::new(0),
            }
        }
    }

    impl Confirmer for Answer {
        fn confirm(&self, _prompt: &str) -> Result<bool> {
            self.asked.fetch_add(1, Ordering::SeqCst);
            Ok(self.approve)
        }
    }

    struct Fixture {
        _dir: TempDir,
        data: TempDir,
        config: Config,
        catalog: FsCatalog,
        auth: ClientAuth,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let mut config = Config::default();
        config.backup.backup_dir = dir.path().to_path_buf();
        config.lock.enabled = false;
        config.server.data_dir = data.path().to_path_buf();
        config.server.data_owner = None;
        config.server.health_timeout_secs = 1;
        config.server.health_interval_secs = 1;
        let catalog = FsCatalog::open(dir.path()).unwrap();
        let auth = ClientAuth::from_config(&config.connection).unwrap();
        Fixture {
            _dir: dir,
            data,
            config,
            catalog,
            auth,
        }
    }

    async fn chain(fx: &Fixture, prepared: bool) -> Result<Chain> {
        let runner = FakeRunner::new();
        let executor = BackupExecutor::new(&fx.config, &fx.catalog, &runner, &fx.auth);
        executor.capture_at(CaptureKind::Full, ts(0)).await?;
        let target: BackupEntry = executor
            .capture_at(CaptureKind::Incremental, ts(1))
            .await?
            .unwrap();
        let chain = ChainResolver::new(&fx.catalog).resolve(&target.id)?;
        if prepared {
            PrepareEngine::new(&fx.config, &fx.catalog, &runner, &fx.auth)
                .run(&chain)
                .await?;
        }
        Ok(chain)
    }

    #[tokio::test]
    async fn test_restore_runs_steps_in_order() -> Result<()> {
        let fx = fixture();
        fs::write(fx.data.path().join("stale.ibd"), "old")?;
        let chain = chain(&fx, true).await?;

        let runner = FakeRunner::new();
        let answer = Answer::new(true);
        RestoreCoordinator::new(&fx.config, &fx.catalog, &runner, &fx.auth, &answer)
            .restore(&chain)
            .await?;

        let steps = runner.steps();
        assert_eq!(steps[0], "stop server");
        assert!(steps[1].starts_with("copy-back"));
        assert_eq!(steps[2], "start server");
        assert_eq!(steps[3], "health check");
        assert_eq!(steps.len(), 4);
        assert_eq!(answer.asked.load(Ordering::SeqCst), 1);

        assert!(!fx.data.path().join("stale.ibd").exists());
        assert!(fx.data.path().join("ibdata1").exists());
        assert_eq!(fx.catalog.get(&chain.full().id)?.state, EntryState::Restored);
        assert_eq!(fx.catalog.get(&chain.target().id)?.state, EntryState::Restored);
        Ok(())
    }

    #[tokio::test]
    async fn test_unprepared_chain_is_refused() -> Result<()> {
        let fx = fixture();
        let chain = chain(&fx, false).await?;

        let runner = FakeRunner::new();
        let result = RestoreCoordinator::new(&fx.config, &fx.catalog, &runner, &fx.auth, &Answer::new(true))
            .restore(&chain)
            .await;
        assert!(matches!(result, Err(OrchestratorError::RestoreFailed { ref step, .. }) if step == "precondition"));
        assert!(runner.commands().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_declined_confirmation_aborts_before_any_step() -> Result<()> {
        let fx = fixture();
        fs::write(fx.data.path().join("keep.ibd"), "live")?;
        let chain = chain(&fx, true).await?;

        let runner = FakeRunner::new();
        let result = RestoreCoordinator::new(&fx.config, &fx.catalog, &runner, &fx.auth, &Answer::new(false))
            .restore(&chain)
            .await;
        assert!(matches!(result, Err(OrchestratorError::Aborted(_))));
        assert!(runner.commands().is_empty());
        assert!(fx.data.path().join("keep.ibd").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_force_skips_confirmation() -> Result<()> {
        let mut fx = fixture();
        fx.config.run.force = true;
        let chain = chain(&fx, true).await?;

        let answer = Answer::new(false);
        RestoreCoordinator::new(&fx.config, &fx.catalog, &FakeRunner::new(), &fx.auth, &answer)
            .restore(&chain)
            .await?;
        assert_eq!(answer.asked.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_stop_failure_is_named_and_data_kept() -> Result<()> {
        let fx = fixture();
        fs::write(fx.data.path().join("keep.ibd"), "live")?;
        let chain = chain(&fx, true).await?;

        let runner = FakeRunner::new().fail_step_containing("stop server");
        let result = RestoreCoordinator::new(&fx.config, &fx.catalog, &runner, &fx.auth, &Answer::new(true))
            .restore(&chain)
            .await;
        assert!(matches!(result, Err(OrchestratorError::RestoreFailed { ref step, .. }) if step == "stop server"));
        assert!(fx.data.path().join("keep.ibd").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_unhealthy_server_times_out() -> Result<()> {
        let fx = fixture();
        let chain = chain(&fx, true).await?;

        let runner = FakeRunner::new().fail_step_containing("health check");
        let result = RestoreCoordinator::new(&fx.config, &fx.catalog, &runner, &fx.auth, &Answer::new(true))
            .restore(&chain)
            .await;
        assert!(matches!(result, Err(OrchestratorError::RestoreFailed { ref step, .. }) if step == "health check"));
        assert!(runner.steps().iter().filter(|s| *s == "health check").count() >= 1);
        assert_eq!(fx.catalog.get(&chain.full().id)?.state, EntryState::Prepared);
        Ok(())
    }
}
