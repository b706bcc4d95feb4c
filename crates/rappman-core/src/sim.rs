//! In-memory launcher twin used by tests and demos.
//!
//! [`SimLauncher`] hands out [`SimProcess`] handles that behave like real
//! children without spawning anything: tests flip them dead via
//! [`SimProcess::exit_with`] to simulate crashes, or configure the launcher
//! to fail the next launch or to ignore graceful termination (forcing the
//! SIGKILL escalation path).

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rappman_types::RappDescriptor;
use tokio::sync::watch;

use crate::launcher::{ProcessLauncher, RappExit, RappProcess};

/// A fake rapp process backed by a watch channel.
pub struct SimProcess {
    pid: u32,
    rapp_id: String,
    ignore_terminate: bool,
    exit_tx: watch::Sender<Option<RappExit>>,
    exit_rx: watch::Receiver<Option<RappExit>>,
}

impl SimProcess {
    fn new(pid: u32, rapp_id: String, ignore_terminate: bool) -> Self {
        let (exit_tx, exit_rx) = watch::channel(None);
        Self {
            pid,
            rapp_id,
            ignore_terminate,
            exit_tx,
            exit_rx,
        }
    }

    /// The rapp this process was launched for.
    pub fn rapp_id(&self) -> &str {
        &self.rapp_id
    }

    /// Test hook: simulate the child exiting on its own with `code`.
    pub fn exit_with(&self, code: i32) {
        let _ = self.exit_tx.send(Some(RappExit {
            code: Some(code),
            clean: code == 0,
        }));
    }
}

#[async_trait]
impl RappProcess for SimProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn is_alive(&self) -> bool {
        self.exit_rx.borrow().is_none()
    }

    fn terminate(&self) {
        if self.ignore_terminate {
            return;
        }
        let _ = self.exit_tx.send(Some(RappExit {
            code: Some(0),
            clean: true,
        }));
    }

    async fn force_kill(&self) {
        let _ = self.exit_tx.send(Some(RappExit {
            code: None,
            clean: false,
        }));
    }

    async fn wait_exit(&self) -> RappExit {
        let mut rx = self.exit_rx.clone();
        loop {
            if let Some(exit) = *rx.borrow() {
                return exit;
            }
            if rx.changed().await.is_err() {
                return RappExit {
                    code: None,
                    clean: false,
                };
            }
        }
    }
}

/// Launcher twin that records every launch.
#[derive(Default)]
pub struct SimLauncher {
    fail_next: AtomicBool,
    ignore_terminate: AtomicBool,
    next_pid: AtomicU32,
    processes: Mutex<Vec<Arc<SimProcess>>>,
    hold_next: Mutex<Option<std::sync::mpsc::Receiver<()>>>,
}

impl SimLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `launch` call fail with an I/O error.
    pub fn fail_next_launch(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Launched processes ignore `terminate`, forcing callers into the
    /// forced-kill escalation path.
    pub fn ignore_terminate(&self) {
        self.ignore_terminate.store(true, Ordering::SeqCst);
    }

    /// The most recently launched process, if any.
    pub fn last_process(&self) -> Option<Arc<SimProcess>> {
        self.processes.lock().unwrap().last().cloned()
    }

    /// How many launches have been performed.
    pub fn launch_count(&self) -> usize {
        self.processes.lock().unwrap().len()
    }

    /// Block the next `launch` call until the returned sender fires (or is
    /// dropped).  Lets tests widen the otherwise-instant launch window, e.g.
    /// to issue a `stop` while a start is still in flight.
    pub fn hold_next_launch(&self) -> std::sync::mpsc::Sender<()> {
        let (tx, rx) = std::sync::mpsc::channel();
        *self.hold_next.lock().unwrap() = Some(rx);
        tx
    }
}

impl ProcessLauncher for SimLauncher {
    fn launch(&self, descriptor: &RappDescriptor) -> std::io::Result<Arc<dyn RappProcess>> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(std::io::Error::other("simulated launch failure"));
        }
        if let Some(rx) = self.hold_next.lock().unwrap().take() {
            let _ = rx.recv();
        }
        let pid = 1000 + self.next_pid.fetch_add(1, Ordering::SeqCst);
        let process = Arc::new(SimProcess::new(
            pid,
            descriptor.id.clone(),
            self.ignore_terminate.load(Ordering::SeqCst),
        ));
        self.processes.lock().unwrap().push(Arc::clone(&process));
        Ok(process)
    }
}
