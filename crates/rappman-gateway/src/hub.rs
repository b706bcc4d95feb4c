//! The [`HubClient`] seam and its in-memory twin.
//!
//! The presence controller and watch loop never speak a wire protocol
//! directly; they drive this trait.  Production code plugs in
//! [`WsHubClient`][crate::ws_hub::WsHubClient]; tests plug in [`SimHub`].

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use rappman_types::{ConnectionError, RobotIdentity};
use tokio::sync::broadcast;

/// Client-side view of the hub.
///
/// # Contract
///
/// * `connect` performs exactly one bounded attempt; retry cadence is the
///   caller's business (the watch loop's, in practice).
/// * `advertise` / `withdraw` flip a single endpoint and surface failures
///   instead of retrying inline.
/// * Connection loss is reported asynchronously on the channel returned by
///   `subscribe_connection_loss`, and reflected by `is_connected`.
#[async_trait]
pub trait HubClient: Send + Sync {
    async fn connect(&self, identity: &RobotIdentity) -> Result<(), ConnectionError>;

    async fn advertise(&self, endpoint: &str) -> Result<(), ConnectionError>;

    async fn withdraw(&self, endpoint: &str) -> Result<(), ConnectionError>;

    fn is_connected(&self) -> bool;

    fn subscribe_connection_loss(&self) -> broadcast::Receiver<()>;
}

/// In-memory hub twin.
///
/// Tracks flipped endpoints in a plain set and lets tests inject failures:
/// refuse connections, fail flips while claiming to be connected, or drop
/// the connection mid-flight.
pub struct SimHub {
    connected: AtomicBool,
    refuse_connect: AtomicBool,
    fail_flips: AtomicBool,
    advertised: Mutex<HashSet<String>>,
    connected_as: Mutex<Option<String>>,
    advertise_calls: AtomicUsize,
    withdraw_calls: AtomicUsize,
    loss_tx: broadcast::Sender<()>,
}

impl Default for SimHub {
    fn default() -> Self {
        let (loss_tx, _) = broadcast::channel(8);
        Self {
            connected: AtomicBool::new(false),
            refuse_connect: AtomicBool::new(false),
            fail_flips: AtomicBool::new(false),
            advertised: Mutex::new(HashSet::new()),
            connected_as: Mutex::new(None),
            advertise_calls: AtomicUsize::new(0),
            withdraw_calls: AtomicUsize::new(0),
            loss_tx,
        }
    }
}

impl SimHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Endpoints currently flipped on the hub.
    pub fn advertised(&self) -> HashSet<String> {
        self.advertised.lock().unwrap().clone()
    }

    /// The identity the robot connected as, if connected at least once.
    pub fn connected_as(&self) -> Option<String> {
        self.connected_as.lock().unwrap().clone()
    }

    /// Simulate the hub going away: connection drops, hub-side state is
    /// forgotten, and the loss notification fires.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.advertised.lock().unwrap().clear();
        let _ = self.loss_tx.send(());
    }

    /// Make subsequent `connect` calls fail until cleared.
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse_connect.store(refuse, Ordering::SeqCst);
    }

    /// Make subsequent flips fail (while the connection itself stays up).
    pub fn fail_flips(&self, fail: bool) {
        self.fail_flips.store(fail, Ordering::SeqCst);
    }

    pub fn advertise_calls(&self) -> usize {
        self.advertise_calls.load(Ordering::SeqCst)
    }

    pub fn withdraw_calls(&self) -> usize {
        self.withdraw_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HubClient for SimHub {
    async fn connect(&self, identity: &RobotIdentity) -> Result<(), ConnectionError> {
        if self.refuse_connect.load(Ordering::SeqCst) {
            return Err(ConnectionError::Unreachable {
                detail: "simulated connection refusal".to_string(),
            });
        }
        *self.connected_as.lock().unwrap() = Some(identity.effective_name());
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn advertise(&self, endpoint: &str) -> Result<(), ConnectionError> {
        self.advertise_calls.fetch_add(1, Ordering::SeqCst);
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ConnectionError::NotConnected);
        }
        if self.fail_flips.load(Ordering::SeqCst) {
            return Err(ConnectionError::Unreachable {
                detail: "simulated flip failure".to_string(),
            });
        }
        self.advertised.lock().unwrap().insert(endpoint.to_string());
        Ok(())
    }

    async fn withdraw(&self, endpoint: &str) -> Result<(), ConnectionError> {
        self.withdraw_calls.fetch_add(1, Ordering::SeqCst);
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ConnectionError::NotConnected);
        }
        if self.fail_flips.load(Ordering::SeqCst) {
            return Err(ConnectionError::Unreachable {
                detail: "simulated flip failure".to_string(),
            });
        }
        self.advertised.lock().unwrap().remove(endpoint);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn subscribe_connection_loss(&self) -> broadcast::Receiver<()> {
        self.loss_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> RobotIdentity {
        RobotIdentity::new("turtle", false)
    }

    #[tokio::test]
    async fn connect_then_advertise() {
        let hub = SimHub::new();
        hub.connect(&identity()).await.unwrap();
        assert!(hub.is_connected());
        assert_eq!(hub.connected_as().as_deref(), Some("turtle"));

        hub.advertise("turtle/demo/talker").await.unwrap();
        assert!(hub.advertised().contains("turtle/demo/talker"));

        hub.withdraw("turtle/demo/talker").await.unwrap();
        assert!(hub.advertised().is_empty());
    }

    #[tokio::test]
    async fn advertise_without_connection_fails() {
        let hub = SimHub::new();
        assert_eq!(
            hub.advertise("x").await.unwrap_err(),
            ConnectionError::NotConnected
        );
    }

    #[tokio::test]
    async fn refused_connection_is_unreachable() {
        let hub = SimHub::new();
        hub.refuse_connections(true);
        assert!(matches!(
            hub.connect(&identity()).await,
            Err(ConnectionError::Unreachable { .. })
        ));
        assert!(!hub.is_connected());
    }

    #[tokio::test]
    async fn drop_connection_notifies_subscribers() {
        let hub = SimHub::new();
        hub.connect(&identity()).await.unwrap();
        let mut rx = hub.subscribe_connection_loss();

        hub.drop_connection();
        assert!(!hub.is_connected());
        rx.recv().await.unwrap();
    }

    #[tokio::test]
    async fn failing_flips_leave_connection_up() {
        let hub = SimHub::new();
        hub.connect(&identity()).await.unwrap();
        hub.fail_flips(true);
        assert!(hub.advertise("x").await.is_err());
        assert!(hub.is_connected());
        assert_eq!(hub.advertise_calls(), 1);
    }
}
