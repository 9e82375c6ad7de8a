//! Server-wide read lock held around full and incremental capture.
//!
//! The lock lives as long as a dedicated client session: the session issues
//! `FLUSH TABLES WITH READ LOCK`, confirms it with a marker row, and is kept
//! open by holding its stdin. Releasing terminates the session. Because the
//! server has no lease on the lock, release must tolerate handles whose
//! session is already gone.

use crate::config::LockConfig;
use crate::tool::ToolCommand;
use crate::utils::errors::{OrchestratorError, Result};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tracing::{debug, info, warn};

const LOCK_MARKER: &str = "LOCK_ACQUIRED";
const RELEASE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct LockCoordinator {
    session: ToolCommand,
    wait_timeout_secs: u64,
    grace_period: Duration,
}

impl LockCoordinator {
    /// `session` is a client command that reads SQL from stdin and writes
    /// result rows to stdout.
    pub fn new(session: ToolCommand, config: &LockConfig) -> Self {
        Self {
            session,
            wait_timeout_secs: config.wait_timeout_secs,
            grace_period: Duration::from_millis(config.grace_period_ms),
        }
    }

    pub async fn acquire(&self) -> Result<LockHandle> {
        info!("Acquiring global read lock");
        let failed = |msg: String| OrchestratorError::LockAcquisitionFailed(msg);

        let mut child = tokio::process::Command::new(&self.session.program)
            .args(&self.session.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| failed(format!("cannot start lock session: {}", e)))?;

        let (Some(mut stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(failed("lock session has no stdio pipes".into()));
        };

        let script = format!(
            "SET SESSION lock_wait_timeout = {};\nFLUSH TABLES WITH READ LOCK;\nSELECT '{}';\n",
            self.wait_timeout_secs, LOCK_MARKER
        );
        if let Err(e) = stdin.write_all(script.as_bytes()).await {
            let stderr = drain_stderr(&mut child).await;
            return Err(failed(format!("lock session closed early ({}): {}", e, stderr)));
        }
        stdin.flush().await.map_err(|e| failed(e.to_string()))?;

        let mut lines = BufReader::new(stdout).lines();
        let confirmed = tokio::time::timeout(self.grace_period, async {
            while let Some(line) = lines.next_line().await? {
                if line.trim() == LOCK_MARKER {
                    return Ok::<bool, std::io::Error>(true);
                }
            }
            Ok(false)
        })
        .await;

        match confirmed {
            Ok(Ok(true)) => {
                info!(pid = ?child.id(), "Global read lock acquired");
                Ok(LockHandle {
                    child: Some(child),
                    stdin: Some(stdin),
                    _stdout: Some(lines.into_inner().into_inner()),
                })
            }
            Ok(Ok(false)) => {
                let stderr = drain_stderr(&mut child).await;
                Err(failed(format!("lock session exited: {}", stderr.trim())))
            }
            Ok(Err(e)) => {
                let _ = child.kill().await;
                Err(failed(e.to_string()))
            }
            Err(_) => {
                let _ = child.kill().await;
                Err(failed(format!(
                    "lock not confirmed within {} ms",
                    self.grace_period.as_millis()
                )))
            }
        }
    }
}

async fn drain_stderr(child: &mut Child) -> String {
    let mut stderr = String::new();
    if let Some(mut pipe) = child.stderr.take() {
        let _ = tokio::time::timeout(Duration::from_secs(1), pipe.read_to_string(&mut stderr)).await;
    }
    let _ = child.kill().await;
    stderr
}

/// Owns the locking session. Dropping the handle kills the session.
#[derive(Debug)]
pub struct LockHandle {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    _stdout: Option<ChildStdout>,
}

impl LockHandle {
    /// A handle that holds nothing; releasing it is a no-op.
    pub fn released() -> Self {
        Self {
            child: None,
            stdin: None,
            _stdout: None,
        }
    }

    pub fn is_held(&self) -> bool {
        self.child.is_some()
    }

    /// Terminate the locking session. Safe to call any number of times.
    pub async fn release(&mut self) -> Result<()> {
        // Closing stdin lets the client disconnect cleanly
        self.stdin.take();
        self._stdout.take();

        let Some(mut child) = self.child.take() else {
            debug!("Release on a handle that holds no lock");
            return Ok(());
        };

        if let Some(pid) = child.id() {
            match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => warn!(pid, error = %e, "Failed to signal lock session"),
            }
        }

        match tokio::time::timeout(RELEASE_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => debug!(?status, "Lock session ended"),
            Ok(Err(e)) => warn!(error = %e, "Failed to reap lock session"),
            Err(_) => {
                warn!("Lock session ignored SIGTERM, killing it");
                child.kill().await?;
            }
        }

        info!("Global read lock released");
        Ok(())
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            warn!("Lock handle dropped without release, killing lock session");
            let _ = child.start_kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator(script: &str, grace_ms: u64) -> LockCoordinator {
        let session = ToolCommand::new("lock session", "sh").args(["-c", script]);
        let config = LockConfig {
            enabled: true,
            wait_timeout_secs: 5,
            grace_period_ms: grace_ms,
        };
        LockCoordinator::new(session, &config)
    }

    #[tokio::test]
    async fn test_release_without_lock_is_ok() {
        let mut handle = LockHandle::released();
        assert!(!handle.is_held());
        assert!(handle.release().await.is_ok());
        assert!(handle.release().await.is_ok());
    }

    #[tokio::test]
    async fn test_acquire_and_release_twice() -> Result<()> {
        let lock = coordinator("echo LOCK_ACQUIRED; exec cat >/dev/null", 5_000);
        let mut handle = lock.acquire().await?;
        assert!(handle.is_held());

        handle.release().await?;
        assert!(!handle.is_held());
        handle.release().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_release_after_session_died() -> Result<()> {
        let lock = coordinator("echo LOCK_ACQUIRED; read line; exit 0", 5_000);
        let mut handle = lock.acquire().await?;
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.release().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_unconfirmed_lock_fails_after_grace_period() {
        let lock = coordinator("exec cat >/dev/null", 200);
        let result = lock.acquire().await;
        assert!(matches!(
            result,
            Err(OrchestratorError::LockAcquisitionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_session_error_is_reported() {
        let lock = coordinator("echo 'ERROR 1045 (28000): Access denied' >&2; exit 1", 5_000);
        match lock.acquire().await {
            Err(OrchestratorError::LockAcquisitionFailed(msg)) => {
                assert!(msg.contains("Access denied") || msg.contains("closed early"), "{}", msg)
            }
            other => panic!("unexpected result: {:?}", other.map(|h| h.is_held())),
        }
    }
}
