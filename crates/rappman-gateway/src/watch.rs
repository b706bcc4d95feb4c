//! [`WatchLoop`] – fixed-period reconciliation of hub presence.
//!
//! Lifecycle transitions update advertisement eagerly through the presence
//! controller, but drift still happens: the hub reconnects and forgets our
//! endpoints, a flip fails transiently, or the whitelist policy is edited
//! at runtime.  The watch loop catches all of it on a timer instead of
//! being triggered by lifecycle events.
//!
//! Each tick:
//!
//! 1. reconnect via the presence controller when the hub connection dropped
//!    (one bounded attempt per tick, failure logged and retried next tick);
//! 2. recompute the advertised endpoint set from a snapshot of the
//!    lifecycle state and the whitelist policy and apply any delta;
//! 3. log when reconciliation actually changed something.
//!
//! Between ticks the loop consumes the presence-change event stream, so a
//! flip that was parked as pending shows up in the log as soon as it
//! happens rather than only when the next tick repairs it.
//!
//! The loop never holds the lifecycle lock across hub I/O: `status()` takes
//! the lock only for the snapshot.

use std::sync::Arc;
use std::time::Duration;

use rappman_core::AppManager;
use rappman_types::LifecycleState;
use tokio::sync::broadcast;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::presence::{PresenceChange, PresenceController, PresenceEvent};

/// Default reconciliation period.
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(2);

/// The periodic reconciliation task.
pub struct WatchLoop {
    manager: Arc<AppManager>,
    presence: Arc<PresenceController>,
    period: Duration,
}

impl WatchLoop {
    pub fn new(manager: Arc<AppManager>, presence: Arc<PresenceController>) -> Self {
        Self {
            manager,
            presence,
            period: DEFAULT_PERIOD,
        }
    }

    /// Override the tick period (builder-style).
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Run forever.  Spawn this as a task and abort it on shutdown.
    pub async fn run(self) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut presence_events = self.presence.subscribe();
        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                event = presence_events.recv() => match event {
                    Ok(event) => self.observe(&event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(lagged_by = n, "watch loop lagged behind presence events");
                    }
                    // The sender lives in the controller this loop holds, so
                    // a closed channel means shutdown; keep ticking until the
                    // task is aborted.
                    Err(broadcast::error::RecvError::Closed) => loop {
                        ticker.tick().await;
                        self.tick().await;
                    },
                },
            }
        }
    }

    /// Drift detection: record what the presence controller just did (or
    /// failed to do) between ticks.
    fn observe(&self, event: &PresenceEvent) {
        match &event.change {
            PresenceChange::FlipPending { target } => {
                warn!(target = ?target, "flip parked as pending, reconciling on next tick");
            }
            change => debug!(change = ?change, "presence change observed"),
        }
    }

    /// One reconciliation pass.  Public so tests (and manual tooling) can
    /// drive the loop without a timer.
    pub async fn tick(&self) {
        if !self.presence.is_connected() {
            match self.presence.connect().await {
                Ok(()) => info!("watch loop re-established hub connection"),
                Err(e) => {
                    warn!(error = %e, "hub still unreachable, will retry next tick");
                    return;
                }
            }
        }

        let (state, rapp) = self.manager.status();
        let target = match state {
            LifecycleState::Running => rapp,
            _ => None,
        };
        if self.presence.set_advertised(target.as_deref()).await {
            info!(state = %state, "watch loop reconciled advertisement drift");
        } else {
            debug!(state = %state, "advertisement in sync");
        }
    }
}
