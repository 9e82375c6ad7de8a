//! Capture a full and two incrementals, resolve the newest, prepare and restore it.

use mysql_backup_agent::catalog::{Catalog, EntryState, FsCatalog, PointerSlot};
use mysql_backup_agent::chain::ChainResolver;
use mysql_backup_agent::executor::{BackupExecutor, CaptureKind};
use mysql_backup_agent::prepare::PrepareEngine;
use mysql_backup_agent::restore::{RestoreCoordinator, StdinConfirmer};
use mysql_backup_agent::testing::{ts, FakeRunner};
use mysql_backup_agent::tool::ClientAuth;
use mysql_backup_agent::{Config, OrchestratorError, Result};
use tempfile::TempDir;

fn config(backups: &TempDir, data: &TempDir) -> Config {
    let mut config = Config::default();
    config.backup.backup_dir = backups.path().to_path_buf();
    config.server.data_dir = data.path().to_path_buf();
    config.server.data_owner = None;
    config.lock.enabled = false;
    config.run.force = true;
    config
}

#[tokio::test]
async fn test_full_and_incrementals_restore_in_order() -> Result<()> {
    let backups = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let config = config(&backups, &data);
    let catalog = FsCatalog::open(backups.path())?;
    let auth = ClientAuth::from_config(&config.connection)?;

    let capture = FakeRunner::new();
    let executor = BackupExecutor::new(&config, &catalog, &capture, &auth);
    let full = executor.capture_at(CaptureKind::Full, ts(0)).await?.unwrap();
    let i1 = executor.capture_at(CaptureKind::Incremental, ts(1)).await?.unwrap();
    let i2 = executor.capture_at(CaptureKind::Incremental, ts(2)).await?.unwrap();
    assert_eq!(i1.base_id.as_ref(), Some(&full.id));
    assert_eq!(i2.base_id.as_ref(), Some(&i1.id));

    let chain = ChainResolver::new(&catalog).resolve(&i2.id)?;
    assert_eq!(chain.ids(), vec![full.id.clone(), i1.id.clone(), i2.id.clone()]);

    let runner = FakeRunner::new();
    PrepareEngine::new(&config, &catalog, &runner, &auth)
        .run(&chain)
        .await?;

    let prepares = runner.commands();
    assert_eq!(prepares.len(), 3);
    assert!(prepares[0].has_arg("--apply-log-only"));
    assert!(prepares[1].has_arg("--apply-log-only"));
    assert!(prepares[1].has_arg(&format!("--incremental-dir={}", i1.path.display())));
    assert!(!prepares[2].has_arg("--apply-log-only"));
    assert!(prepares[2].has_arg(&format!("--incremental-dir={}", i2.path.display())));

    RestoreCoordinator::new(&config, &catalog, &runner, &auth, &StdinConfirmer)
        .restore(&chain)
        .await?;
    assert!(data.path().join("ibdata1").exists());
    assert_eq!(catalog.get(&full.id)?.state, EntryState::Restored);
    assert_eq!(catalog.get(&i2.id)?.state, EntryState::Restored);
    assert_eq!(catalog.get_pointer(PointerSlot::LastIncremental)?, Some(i2.id));
    Ok(())
}

#[tokio::test]
async fn test_deleted_middle_incremental_breaks_later_targets() -> Result<()> {
    let backups = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let config = config(&backups, &data);
    let catalog = FsCatalog::open(backups.path())?;
    let auth = ClientAuth::from_config(&config.connection)?;

    let runner = FakeRunner::new();
    let executor = BackupExecutor::new(&config, &catalog, &runner, &auth);
    executor.capture_at(CaptureKind::Full, ts(0)).await?;
    let i1 = executor.capture_at(CaptureKind::Incremental, ts(1)).await?.unwrap();
    let i2 = executor.capture_at(CaptureKind::Incremental, ts(2)).await?.unwrap();
    let i3 = executor.capture_at(CaptureKind::Incremental, ts(3)).await?.unwrap();

    catalog.remove(&i2.id)?;
    let resolver = ChainResolver::new(&catalog);
    assert!(matches!(resolver.resolve(&i3.id), Err(OrchestratorError::ChainBroken { .. })));
    assert_eq!(resolver.resolve(&i1.id)?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_failed_verification_does_not_break_later_incrementals() -> Result<()> {
    let backups = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let config = config(&backups, &data);
    let catalog = FsCatalog::open(backups.path())?;
    let auth = ClientAuth::from_config(&config.connection)?;

    let runner = FakeRunner::new();
    let executor = BackupExecutor::new(&config, &catalog, &runner, &auth);
    let full = executor.capture_at(CaptureKind::Full, ts(0)).await?.unwrap();
    let i1 = executor.capture_at(CaptureKind::Incremental, ts(1)).await?.unwrap();

    let broken = FakeRunner::new().without_checkpoints();
    let result = BackupExecutor::new(&config, &catalog, &broken, &auth)
        .capture_at(CaptureKind::Incremental, ts(2))
        .await;
    assert!(matches!(result, Err(OrchestratorError::VerificationFailed { .. })));

    let i3 = executor.capture_at(CaptureKind::Incremental, ts(3)).await?.unwrap();
    assert_eq!(i3.base_id.as_ref(), Some(&i1.id));
    assert_eq!(catalog.get_pointer(PointerSlot::LastIncremental)?, Some(i3.id.clone()));

    let chain = ChainResolver::new(&catalog).resolve(&i3.id)?;
    assert_eq!(chain.ids(), vec![full.id, i1.id, i3.id]);
    Ok(())
}
