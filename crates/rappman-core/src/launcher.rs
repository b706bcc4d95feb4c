//! Process launcher seam – [`ProcessLauncher`] / [`RappProcess`].
//!
//! The lifecycle state machine treats rapps as opaque processes behind these
//! two traits: launch, liveness, graceful terminate, forced kill, and an
//! async exit notification.  The production implementation
//! ([`TokioLauncher`]) spawns real children via `tokio::process`; tests and
//! demos use the in-memory [`SimLauncher`][crate::sim::SimLauncher].
//!
//! Graceful termination sends SIGTERM directly to the child's pid so the
//! rapp can clean up its own resources; forced kill goes through the waiter
//! task, which owns the [`tokio::process::Child`], so it works on every
//! platform.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use rappman_types::RappDescriptor;
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

/// How a rapp process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RappExit {
    /// Exit code, when the process exited rather than being signalled.
    pub code: Option<i32>,
    /// Whether the exit counts as clean (status zero).
    pub clean: bool,
}

/// Handle to a launched rapp process.
#[async_trait]
pub trait RappProcess: Send + Sync {
    /// OS process id, when one exists.
    fn pid(&self) -> Option<u32>;

    /// Whether the process has not yet exited.
    fn is_alive(&self) -> bool;

    /// Ask the process to terminate gracefully.  Best-effort and
    /// non-blocking; callers bound the wait themselves and escalate to
    /// [`RappProcess::force_kill`] when the bound is exceeded.
    fn terminate(&self);

    /// Kill the process without giving it a chance to clean up.
    async fn force_kill(&self);

    /// Resolve once the process has exited.  May be awaited by any number
    /// of callers; all observe the same [`RappExit`].
    async fn wait_exit(&self) -> RappExit;
}

/// Turns a [`RappDescriptor`] into a live [`RappProcess`].
pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, descriptor: &RappDescriptor) -> std::io::Result<Arc<dyn RappProcess>>;
}

// ---------------------------------------------------------------------------
// Tokio-backed implementation
// ---------------------------------------------------------------------------

/// Spawns rapp children with [`tokio::process::Command`].
#[derive(Default)]
pub struct TokioLauncher;

impl TokioLauncher {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessLauncher for TokioLauncher {
    fn launch(&self, descriptor: &RappDescriptor) -> std::io::Result<Arc<dyn RappProcess>> {
        let mut child = Command::new(&descriptor.entry_point)
            .args(&descriptor.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        let pid = child.id();
        info!(rapp = %descriptor.id, pid = ?pid, "rapp process launched");

        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, mut kill_rx) = mpsc::channel::<()>(1);

        // The waiter task owns the Child: it is the only place that calls
        // `wait`, and forced kills are routed through it.
        tokio::spawn(async move {
            let exit = tokio::select! {
                status = child.wait() => exit_from_status(status),
                _ = kill_rx.recv() => {
                    if let Err(e) = child.start_kill() {
                        warn!(pid = ?pid, error = %e, "force kill failed");
                    }
                    exit_from_status(child.wait().await)
                }
            };
            let _ = exit_tx.send(Some(exit));
        });

        Ok(Arc::new(TokioProcess {
            pid,
            exit_rx,
            kill_tx,
        }))
    }
}

fn exit_from_status(status: std::io::Result<std::process::ExitStatus>) -> RappExit {
    match status {
        Ok(status) => RappExit {
            code: status.code(),
            clean: status.success(),
        },
        Err(_) => RappExit {
            code: None,
            clean: false,
        },
    }
}

struct TokioProcess {
    pid: Option<u32>,
    exit_rx: watch::Receiver<Option<RappExit>>,
    kill_tx: mpsc::Sender<()>,
}

#[async_trait]
impl RappProcess for TokioProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn is_alive(&self) -> bool {
        self.exit_rx.borrow().is_none()
    }

    fn terminate(&self) {
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            // SAFETY: plain signal send; the pid came from our own spawn.
            let rc = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
            if rc != 0 {
                warn!(pid, "SIGTERM delivery failed");
            }
            return;
        }
        // No pid to signal: fall back to a forced kill via the waiter task.
        let _ = self.kill_tx.try_send(());
    }

    async fn force_kill(&self) {
        let _ = self.kill_tx.send(()).await;
    }

    async fn wait_exit(&self) -> RappExit {
        let mut rx = self.exit_rx.clone();
        loop {
            if let Some(exit) = *rx.borrow() {
                return exit;
            }
            if rx.changed().await.is_err() {
                // Waiter task gone without reporting: treat as unclean.
                return RappExit {
                    code: None,
                    clean: false,
                };
            }
        }
    }
}
