//! [`AppManager`] – the single-tenant lifecycle state machine.
//!
//! States: `Idle → Starting → Running → Stopping → Idle`, with
//! `Starting/Running → Failed` on abnormal child exit and `Failed → Idle`
//! after cleanup.  The core invariant is enforced here, not advisory: **at
//! most one rapp instance runs per robot** — any `start` while the state is
//! not `Idle` fails with [`ControlError::AlreadyRunning`].
//!
//! # Locking discipline
//!
//! One mutex guards the state.  Each request takes it exactly once per
//! transition and never holds it across process launch, termination waits or
//! hub I/O, so `status` queries and the watch loop stay responsive while a
//! child is being spawned or torn down.
//!
//! # Exit monitoring
//!
//! Every successful launch spawns a monitor task that awaits the child's
//! exit and funnels it through [`AppManager::handle_child_exit`], the same
//! single transition entry point used by everything else.  A per-launch run
//! token distinguishes the current child from a superseded one, so a stale
//! exit notification can never corrupt a later run.
//!
//! Transitions are published as [`LifecycleEvent`]s on a broadcast channel;
//! the presence controller subscribes to keep hub advertisement in step.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rappman_types::{CallerContext, ControlError, LifecycleEvent, LifecycleState, Transition};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use crate::gate::{AuthGate, Verdict};
use crate::launcher::{ProcessLauncher, RappExit, RappProcess};
use crate::registry::RappRegistry;

/// Default bound on the graceful-stop wait before SIGKILL escalation.
const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

/// Event channel capacity.  Subscribers that fall further behind see a
/// `Lagged` error and resynchronise from `status`.
const EVENT_CAPACITY: usize = 64;

struct Current {
    rapp_id: String,
    /// Per-launch token; exit notifications carrying another token are stale.
    run: Uuid,
    process: Option<Arc<dyn RappProcess>>,
}

struct Inner {
    state: LifecycleState,
    current: Option<Current>,
    /// Set when `stop` arrives while a launch is still in flight; the start
    /// path observes it once the launch resolves.
    stop_requested: bool,
}

/// The app lifecycle manager.  Share it as `Arc<AppManager>`; `start`
/// requires the `Arc` receiver so it can hand a clone to the monitor task.
pub struct AppManager {
    registry: Arc<RappRegistry>,
    gate: Arc<AuthGate>,
    launcher: Arc<dyn ProcessLauncher>,
    stop_grace: Duration,
    inner: Mutex<Inner>,
    events: broadcast::Sender<LifecycleEvent>,
}

impl AppManager {
    pub fn new(
        registry: Arc<RappRegistry>,
        gate: Arc<AuthGate>,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            registry,
            gate,
            launcher,
            stop_grace: DEFAULT_STOP_GRACE,
            inner: Mutex::new(Inner {
                state: LifecycleState::Idle,
                current: None,
                stop_requested: false,
            }),
            events,
        }
    }

    /// Override the graceful-stop bound (builder-style).
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Subscribe to lifecycle transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// The registry this manager starts rapps from.
    pub fn registry(&self) -> &RappRegistry {
        &self.registry
    }

    /// Current state and the identifier of the associated rapp, if any.
    /// Always succeeds; the lock is held only for the snapshot.
    pub fn status(&self) -> (LifecycleState, Option<String>) {
        let inner = self.lock();
        (
            inner.state,
            inner.current.as_ref().map(|c| c.rapp_id.clone()),
        )
    }

    /// Start `id` on behalf of `caller`.
    ///
    /// # Errors
    ///
    /// - [`ControlError::Unauthorized`] – caller denied by the gate.
    /// - [`ControlError::AlreadyRunning`] – single-tenancy violation.
    /// - [`ControlError::NotFound`] – unknown rapp identifier.
    /// - [`ControlError::Launch`] – missing capabilities or spawn failure;
    ///   the state machine ends back in `Idle` via `Failed`.
    pub async fn start(
        self: &Arc<Self>,
        id: &str,
        caller: &CallerContext,
    ) -> Result<(), ControlError> {
        if self.gate.evaluate(caller) == Verdict::Deny {
            return Err(ControlError::Unauthorized);
        }

        // Admission and the Idle → Starting transition, under the lock.
        let (descriptor, run) = {
            let mut inner = self.lock();
            if inner.state != LifecycleState::Idle {
                let running = inner
                    .current
                    .as_ref()
                    .map(|c| c.rapp_id.clone())
                    .unwrap_or_default();
                return Err(ControlError::AlreadyRunning { running });
            }
            let descriptor = self
                .registry
                .lookup(id)
                .map_err(|_| ControlError::NotFound(id.to_string()))?
                .clone();
            if !self.registry.is_runnable(id) {
                return Err(ControlError::Launch {
                    detail: format!("required capabilities of '{id}' are not available"),
                });
            }
            let run = Uuid::new_v4();
            inner.state = LifecycleState::Starting;
            inner.stop_requested = false;
            inner.current = Some(Current {
                rapp_id: id.to_string(),
                run,
                process: None,
            });
            self.emit(Transition::Starting {
                rapp: id.to_string(),
            });
            (descriptor, run)
        };

        info!(rapp = %id, "starting rapp");
        let process = match self.launcher.launch(&descriptor) {
            Ok(process) => process,
            Err(e) => {
                warn!(rapp = %id, error = %e, "rapp launch failed");
                let mut inner = self.lock();
                inner.state = LifecycleState::Failed;
                self.emit(Transition::Failed {
                    rapp: id.to_string(),
                });
                inner.state = LifecycleState::Idle;
                inner.current = None;
                inner.stop_requested = false;
                return Err(ControlError::Launch {
                    detail: e.to_string(),
                });
            }
        };

        // Launch resolved: either enter Running or honour a stop that
        // arrived mid-Starting.
        let cancelled = {
            let mut inner = self.lock();
            if let Some(cur) = inner.current.as_mut().filter(|c| c.run == run) {
                cur.process = Some(Arc::clone(&process));
            }
            if inner.stop_requested {
                inner.state = LifecycleState::Stopping;
                self.emit(Transition::Stopping {
                    rapp: id.to_string(),
                });
                true
            } else {
                inner.state = LifecycleState::Running;
                self.emit(Transition::Running {
                    rapp: id.to_string(),
                });
                false
            }
        };

        if cancelled {
            self.shutdown_process(&process).await;
            let mut inner = self.lock();
            inner.state = LifecycleState::Idle;
            inner.current = None;
            inner.stop_requested = false;
            self.emit(Transition::Stopped {
                rapp: id.to_string(),
            });
            info!(rapp = %id, "launch cancelled by stop request");
            return Ok(());
        }

        info!(rapp = %id, pid = ?process.pid(), "rapp running");
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let exit = process.wait_exit().await;
            manager.handle_child_exit(run, exit);
        });
        Ok(())
    }

    /// Stop whatever is associated with the state machine.
    ///
    /// # Errors
    ///
    /// - [`ControlError::Unauthorized`] – caller denied by the gate.
    /// - [`ControlError::NotRunning`] – state was `Idle`.
    pub async fn stop(&self, caller: &CallerContext) -> Result<(), ControlError> {
        if self.gate.evaluate(caller) == Verdict::Deny {
            return Err(ControlError::Unauthorized);
        }

        let (rapp, process) = {
            let mut inner = self.lock();
            match inner.state {
                LifecycleState::Idle => return Err(ControlError::NotRunning),
                LifecycleState::Starting => {
                    // The in-flight start observes this once the launch
                    // resolves and tears the child down itself.
                    inner.stop_requested = true;
                    info!("stop requested while starting, deferred to the launch path");
                    return Ok(());
                }
                // A stop is already in flight; this request has nothing
                // left to do.
                LifecycleState::Stopping | LifecycleState::Failed => return Ok(()),
                LifecycleState::Running => match inner.current.as_ref() {
                    Some(cur) => {
                        let rapp = cur.rapp_id.clone();
                        let process = cur.process.clone();
                        inner.state = LifecycleState::Stopping;
                        self.emit(Transition::Stopping { rapp: rapp.clone() });
                        (rapp, process)
                    }
                    None => {
                        inner.state = LifecycleState::Idle;
                        return Err(ControlError::NotRunning);
                    }
                },
            }
        };

        info!(rapp = %rapp, "stopping rapp");
        if let Some(process) = process {
            self.shutdown_process(&process).await;
        }

        let mut inner = self.lock();
        inner.state = LifecycleState::Idle;
        inner.current = None;
        inner.stop_requested = false;
        self.emit(Transition::Stopped { rapp: rapp.clone() });
        info!(rapp = %rapp, "rapp stopped");
        Ok(())
    }

    /// Graceful terminate with a bounded wait, escalating to a forced kill.
    /// Escalation is reported, never fatal to the manager.
    async fn shutdown_process(&self, process: &Arc<dyn RappProcess>) {
        process.terminate();
        if timeout(self.stop_grace, process.wait_exit()).await.is_err() {
            warn!(
                pid = ?process.pid(),
                grace_ms = self.stop_grace.as_millis() as u64,
                "graceful stop exceeded its bound, escalating to forced kill"
            );
            process.force_kill().await;
            let _ = process.wait_exit().await;
        }
    }

    /// Single entry point for out-of-band child exits (monitor task).
    ///
    /// An exit observed while `Stopping` is the expected result of the stop
    /// path and ignored here; an exit with a stale run token belongs to a
    /// superseded launch and is dropped.
    fn handle_child_exit(&self, run: Uuid, exit: RappExit) {
        let mut inner = self.lock();
        let rapp = match inner.current.as_ref() {
            Some(cur) if cur.run == run => cur.rapp_id.clone(),
            _ => return,
        };
        match inner.state {
            LifecycleState::Running | LifecycleState::Starting => {
                warn!(
                    rapp = %rapp,
                    code = ?exit.code,
                    clean = exit.clean,
                    "rapp process exited unexpectedly"
                );
                inner.state = LifecycleState::Failed;
                self.emit(Transition::Failed { rapp: rapp.clone() });
                inner.state = LifecycleState::Idle;
                inner.current = None;
                inner.stop_requested = false;
            }
            _ => {}
        }
    }

    fn emit(&self, transition: Transition) {
        // No subscribers is a normal condition.
        let _ = self.events.send(LifecycleEvent::new(transition));
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
