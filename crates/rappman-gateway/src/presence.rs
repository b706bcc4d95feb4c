//! [`PresenceController`] – owns the advertised endpoint set.
//!
//! The endpoint set is derived state: it is recomputed from the lifecycle
//! target and the whitelist policy on every call, never mutated directly by
//! callers.  Flips are idempotent (re-applying the current target performs
//! no hub I/O) and failures are recorded as *pending* rather than retried
//! inline — the watch loop reconciles them on its next tick.
//!
//! Every recompute emits a [`PresenceEvent`] describing its outcome, even
//! when nothing needed doing; the watch loop consumes the stream for drift
//! detection.
//!
//! Endpoint names are namespaced under the robot's effective identity, so a
//! running `demo/talker` on robot `turtle-3f2a91bc` is flipped as
//! `turtle-3f2a91bc/demo/talker`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rappman_core::AuthGate;
use rappman_types::{ConnectionError, LifecycleEvent, RobotIdentity, Transition};
use tokio::sync::{Mutex, broadcast};
use tracing::{info, warn};
use uuid::Uuid;

use crate::hub::HubClient;

/// What changed on the hub (or failed to).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceChange {
    /// The outward identity was (re)established with the hub.
    Connected,
    Advertised(String),
    Withdrawn(String),
    /// A flip could not be applied; the target is parked for the watch loop.
    FlipPending { target: Option<String> },
    /// A recompute confirmed the hub already matches the target.
    InSync { target: Option<String> },
}

/// Timestamped presence-change notification.
#[derive(Debug, Clone)]
pub struct PresenceEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub change: PresenceChange,
}

impl PresenceEvent {
    fn new(change: PresenceChange) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            change,
        }
    }
}

struct PresenceInner {
    /// Endpoint currently applied on the hub, as far as we know.
    advertised: Option<String>,
    /// Endpoint the hub *should* show.  Differs from `advertised` only
    /// while a flip is pending.
    desired: Option<String>,
}

/// Maintains the robot's outward identity and its advertised endpoints.
pub struct PresenceController {
    hub: Arc<dyn HubClient>,
    gate: Arc<AuthGate>,
    identity: RobotIdentity,
    inner: Mutex<PresenceInner>,
    events: broadcast::Sender<PresenceEvent>,
}

impl PresenceController {
    pub fn new(hub: Arc<dyn HubClient>, gate: Arc<AuthGate>, identity: RobotIdentity) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            hub,
            gate,
            identity,
            inner: Mutex::new(PresenceInner {
                advertised: None,
                desired: None,
            }),
            events,
        }
    }

    pub fn identity(&self) -> &RobotIdentity {
        &self.identity
    }

    pub fn is_connected(&self) -> bool {
        self.hub.is_connected()
    }

    /// Subscribe to presence-change events.
    pub fn subscribe(&self) -> broadcast::Receiver<PresenceEvent> {
        self.events.subscribe()
    }

    /// Whether a flip is parked waiting for reconciliation.
    pub async fn is_pending(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.advertised != inner.desired
    }

    /// Establish the outward identity with the hub.  One attempt; the watch
    /// loop owns the retry cadence.
    ///
    /// A fresh connection means the hub has forgotten our endpoints, so the
    /// applied set is reset and the next reconciliation re-flips.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let mut inner = self.inner.lock().await;
        self.hub.connect(&self.identity).await?;
        inner.advertised = None;
        info!(robot = %self.identity, "connected to hub");
        self.emit(PresenceChange::Connected);
        Ok(())
    }

    /// Recompute the advertised endpoint set for `target` (the running rapp,
    /// or `None`) and apply any delta to the hub.
    ///
    /// Idempotent: re-applying the already-applied target performs no hub
    /// I/O and reports [`PresenceChange::InSync`].  Every call emits one
    /// presence-change event.  Returns whether reconciliation performed (or
    /// attempted) any work.
    pub async fn set_advertised(&self, target: Option<&str>) -> bool {
        let desired = self.desired_endpoint(target);
        let mut inner = self.inner.lock().await;
        inner.desired = desired;
        if inner.advertised == inner.desired {
            self.emit(PresenceChange::InSync {
                target: inner.desired.clone(),
            });
            return false;
        }
        self.apply(&mut inner).await;
        true
    }

    /// Flip/unflip toward `inner.desired`.  On failure the delta stays
    /// recorded (`advertised != desired`) and a pending event is emitted.
    async fn apply(&self, inner: &mut PresenceInner) {
        if let Some(old) = inner.advertised.clone()
            && inner.desired.as_deref() != Some(old.as_str())
        {
            match self.hub.withdraw(&old).await {
                Ok(()) => {
                    inner.advertised = None;
                    info!(endpoint = %old, "endpoint withdrawn from hub");
                    self.emit(PresenceChange::Withdrawn(old));
                }
                Err(e) => {
                    warn!(endpoint = %old, error = %e, "withdraw failed, flip parked as pending");
                    self.emit(PresenceChange::FlipPending {
                        target: inner.desired.clone(),
                    });
                    return;
                }
            }
        }

        if let Some(new) = inner.desired.clone() {
            match self.hub.advertise(&new).await {
                Ok(()) => {
                    info!(endpoint = %new, "endpoint advertised on hub");
                    inner.advertised = Some(new.clone());
                    self.emit(PresenceChange::Advertised(new));
                }
                Err(e) => {
                    warn!(endpoint = %new, error = %e, "advertise failed, flip parked as pending");
                    self.emit(PresenceChange::FlipPending {
                        target: Some(new),
                    });
                }
            }
        }
    }

    /// Derive the single desired endpoint from the lifecycle target and the
    /// active whitelist policy.  Local-only mode keeps the robot invisible
    /// regardless of lifecycle state.
    fn desired_endpoint(&self, target: Option<&str>) -> Option<String> {
        if self.gate.policy().local_only {
            return None;
        }
        target.map(|rapp| format!("{}/{}", self.identity.effective_name(), rapp))
    }

    fn emit(&self, change: PresenceChange) {
        let _ = self.events.send(PresenceEvent::new(change));
    }

    /// Forward lifecycle transitions into advertisement updates.  Spawn
    /// this next to the manager; it runs until the event channel closes.
    pub async fn run_lifecycle_sync(
        self: Arc<Self>,
        mut events: broadcast::Receiver<LifecycleEvent>,
    ) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let target = match &event.transition {
                        Transition::Running { rapp } => Some(rapp.clone()),
                        _ => None,
                    };
                    let _ = self.set_advertised(target.as_deref()).await;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(lagged_by = n, "presence sync lagged behind lifecycle events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
