//! [`RemoteControlServer`] – WebSocket request/response endpoint.
//!
//! Listens on `0.0.0.0:9421` (configurable via
//! [`RemoteControlServer::with_port`]).  Each frame is a single JSON request
//! and gets exactly one JSON response:
//!
//! ```json
//! → {"op": "start", "rapp": "demo/talker", "hub": "gateway.alpha"}
//! ← {"outcome": "accepted"}
//! → {"op": "stop", "hub": "gateway.alpha"}
//! ← {"outcome": "rejected", "reason": "not-running", "detail": "..."}
//! → {"op": "status"}
//! ← {"outcome": "status", "state": "idle", "rapp": null, "robot": "turtle-3f2a91bc"}
//! ```
//!
//! A malformed frame is answered with `rejected/bad-request`; the connection
//! stays up.  Authorization happens inside the lifecycle manager, keyed on
//! the `hub` field each mutating request must carry.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use rappman_core::AppManager;
use rappman_types::{CallerContext, ControlError, LifecycleState};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{error, info, warn};

/// Default TCP port for the remote control endpoint.
pub const DEFAULT_PORT: u16 = 9421;

/// A control request, tagged by `op`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case", deny_unknown_fields)]
pub enum Request {
    Start { rapp: String, hub: String },
    Stop { hub: String },
    Status,
    List,
}

/// Typed rejection reasons, one per [`ControlError`] variant plus
/// `bad-request` for frames that do not parse.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    Unauthorized,
    AlreadyRunning,
    NotRunning,
    NotFound,
    LaunchError,
    BadRequest,
}

/// One line of the `list` response.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RappSummary {
    pub id: String,
    pub display_name: String,
    pub runnable: bool,
}

/// A control response, tagged by `outcome`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Response {
    Accepted,
    Rejected {
        reason: RejectReason,
        detail: String,
    },
    Status {
        state: LifecycleState,
        rapp: Option<String>,
        robot: String,
    },
    RappList {
        rapps: Vec<RappSummary>,
    },
}

impl Response {
    fn rejected(err: &ControlError) -> Self {
        let reason = match err {
            ControlError::Unauthorized => RejectReason::Unauthorized,
            ControlError::AlreadyRunning { .. } => RejectReason::AlreadyRunning,
            ControlError::NotRunning => RejectReason::NotRunning,
            ControlError::NotFound(_) => RejectReason::NotFound,
            ControlError::Launch { .. } => RejectReason::LaunchError,
        };
        Response::Rejected {
            reason,
            detail: err.to_string(),
        }
    }

    fn bad_request(detail: impl Into<String>) -> Self {
        Response::Rejected {
            reason: RejectReason::BadRequest,
            detail: detail.into(),
        }
    }
}

/// Execute one already-parsed request against the lifecycle manager.
pub async fn handle_request(
    manager: &Arc<AppManager>,
    robot: &str,
    request: Request,
) -> Response {
    match request {
        Request::Start { rapp, hub } => {
            let caller = CallerContext::remote(hub);
            match manager.start(&rapp, &caller).await {
                Ok(()) => Response::Accepted,
                Err(e) => Response::rejected(&e),
            }
        }
        Request::Stop { hub } => {
            let caller = CallerContext::remote(hub);
            match manager.stop(&caller).await {
                Ok(()) => Response::Accepted,
                Err(e) => Response::rejected(&e),
            }
        }
        Request::Status => {
            let (state, rapp) = manager.status();
            Response::Status {
                state,
                rapp,
                robot: robot.to_string(),
            }
        }
        Request::List => {
            let registry = manager.registry();
            let rapps = registry
                .installed_rapps()
                .iter()
                .map(|d| RappSummary {
                    id: d.id.clone(),
                    display_name: d.display_name.clone(),
                    runnable: registry.is_runnable(&d.id),
                })
                .collect();
            Response::RappList { rapps }
        }
    }
}

/// Parse one text frame and execute it.
pub async fn handle_frame(manager: &Arc<AppManager>, robot: &str, text: &str) -> Response {
    match serde_json::from_str::<Request>(text) {
        Ok(request) => handle_request(manager, robot, request).await,
        Err(e) => Response::bad_request(format!("malformed request: {e}")),
    }
}

/// The WebSocket control server.
pub struct RemoteControlServer {
    manager: Arc<AppManager>,
    robot: String,
    port: u16,
}

impl RemoteControlServer {
    /// Create a server driving `manager`, identifying the robot as `robot`
    /// in status responses, on the [`DEFAULT_PORT`].
    pub fn new(manager: Arc<AppManager>, robot: impl Into<String>) -> Self {
        Self {
            manager,
            robot: robot.into(),
            port: DEFAULT_PORT,
        }
    }

    /// Override the listening port (builder-style).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Start the server.  Runs until the listener fails to bind; per-client
    /// errors are logged and never take the server down.
    pub async fn run(self) -> std::io::Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr).await?;
        info!(port = self.port, "remote control channel listening");

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let manager = Arc::clone(&self.manager);
                    let robot = self.robot.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, peer, manager, robot).await {
                            warn!(peer = %peer, error = %e, "control client error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "control accept error");
                }
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    peer: SocketAddr,
    manager: Arc<AppManager>,
    robot: String,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let ws_stream = accept_async(stream).await?;
    info!(peer = %peer, "control client connected");
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let response = handle_frame(&manager, &robot, text.as_str()).await;
                let json = match serde_json::to_string(&response) {
                    Ok(json) => json,
                    Err(e) => {
                        error!(peer = %peer, error = %e, "response serialization failed");
                        continue;
                    }
                };
                if ws_tx.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            Ok(Message::Ping(payload)) => {
                if ws_tx.send(Message::Pong(payload)).await.is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(_) => break,
        }
    }

    info!(peer = %peer, "control client disconnected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rappman_core::sim::SimLauncher;
    use rappman_core::{AuthGate, ProcessLauncher, RappRegistry, WhitelistPolicy};
    use rappman_types::RappDescriptor;

    fn descriptor(id: &str, caps: &[&str]) -> RappDescriptor {
        RappDescriptor {
            id: id.to_string(),
            display_name: format!("{id} demo"),
            icon: None,
            entry_point: "/opt/rapps/bin".to_string(),
            args: Vec::new(),
            required_capabilities: caps.iter().map(|c| c.to_string()).collect(),
        }
    }

    fn manager_with_policy(policy: WhitelistPolicy) -> Arc<AppManager> {
        let registry = Arc::new(RappRegistry::from_descriptors(
            [
                descriptor("demo/talker", &[]),
                descriptor("demo/mapper", &["laser"]),
            ],
            &[],
        ));
        let gate = Arc::new(AuthGate::new(policy));
        let launcher: Arc<dyn ProcessLauncher> = Arc::new(SimLauncher::new());
        Arc::new(AppManager::new(registry, gate, launcher))
    }

    #[tokio::test]
    async fn start_from_whitelisted_hub_is_accepted() {
        let manager =
            manager_with_policy(WhitelistPolicy::new(vec!["gateway.*".to_string()], false));
        let response = handle_frame(
            &manager,
            "turtle",
            r#"{"op":"start","rapp":"demo/talker","hub":"gateway.alpha"}"#,
        )
        .await;
        assert_eq!(response, Response::Accepted);
        assert_eq!(manager.status().0, LifecycleState::Running);
    }

    #[tokio::test]
    async fn start_from_unlisted_hub_is_unauthorized() {
        let manager =
            manager_with_policy(WhitelistPolicy::new(vec!["gateway.*".to_string()], false));
        let response = handle_frame(
            &manager,
            "turtle",
            r#"{"op":"start","rapp":"demo/talker","hub":"intruder"}"#,
        )
        .await;
        assert!(matches!(
            response,
            Response::Rejected {
                reason: RejectReason::Unauthorized,
                ..
            }
        ));
        assert_eq!(manager.status().0, LifecycleState::Idle);
    }

    #[tokio::test]
    async fn unknown_rapp_is_not_found() {
        let manager = manager_with_policy(WhitelistPolicy::open());
        let response = handle_frame(
            &manager,
            "turtle",
            r#"{"op":"start","rapp":"demo/ghost","hub":"gateway.alpha"}"#,
        )
        .await;
        assert!(matches!(
            response,
            Response::Rejected {
                reason: RejectReason::NotFound,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn second_start_reports_already_running() {
        let manager = manager_with_policy(WhitelistPolicy::open());
        let start = r#"{"op":"start","rapp":"demo/talker","hub":"gateway.alpha"}"#;
        assert_eq!(handle_frame(&manager, "turtle", start).await, Response::Accepted);
        let response = handle_frame(&manager, "turtle", start).await;
        assert!(matches!(
            response,
            Response::Rejected {
                reason: RejectReason::AlreadyRunning,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn stop_when_idle_reports_not_running() {
        let manager = manager_with_policy(WhitelistPolicy::open());
        let response =
            handle_frame(&manager, "turtle", r#"{"op":"stop","hub":"gateway.alpha"}"#).await;
        assert!(matches!(
            response,
            Response::Rejected {
                reason: RejectReason::NotRunning,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn status_reflects_lifecycle() {
        let manager = manager_with_policy(WhitelistPolicy::open());
        let response = handle_frame(&manager, "turtle-3f2a91bc", r#"{"op":"status"}"#).await;
        assert_eq!(
            response,
            Response::Status {
                state: LifecycleState::Idle,
                rapp: None,
                robot: "turtle-3f2a91bc".to_string(),
            }
        );

        handle_frame(
            &manager,
            "turtle-3f2a91bc",
            r#"{"op":"start","rapp":"demo/talker","hub":"gateway.alpha"}"#,
        )
        .await;
        let response = handle_frame(&manager, "turtle-3f2a91bc", r#"{"op":"status"}"#).await;
        assert_eq!(
            response,
            Response::Status {
                state: LifecycleState::Running,
                rapp: Some("demo/talker".to_string()),
                robot: "turtle-3f2a91bc".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn list_distinguishes_runnable_from_installed() {
        // `demo/mapper` needs the `laser` capability, which this platform
        // does not have.
        let manager = manager_with_policy(WhitelistPolicy::open());
        let response = handle_frame(&manager, "turtle", r#"{"op":"list"}"#).await;
        let Response::RappList { rapps } = response else {
            panic!("expected rapp list");
        };
        assert_eq!(rapps.len(), 2);
        assert!(rapps.iter().any(|r| r.id == "demo/talker" && r.runnable));
        assert!(rapps.iter().any(|r| r.id == "demo/mapper" && !r.runnable));
    }

    #[tokio::test]
    async fn malformed_frame_gets_bad_request() {
        let manager = manager_with_policy(WhitelistPolicy::open());
        for bad in ["not json", r#"{"op":"reboot"}"#, r#"{"op":"start"}"#] {
            let response = handle_frame(&manager, "turtle", bad).await;
            assert!(
                matches!(
                    response,
                    Response::Rejected {
                        reason: RejectReason::BadRequest,
                        ..
                    }
                ),
                "frame {bad:?} should be rejected as bad-request"
            );
        }
    }

    #[tokio::test]
    async fn responses_serialize_with_outcome_tag() {
        let accepted = serde_json::to_value(Response::Accepted).unwrap();
        assert_eq!(accepted["outcome"], "accepted");

        let rejected = serde_json::to_value(Response::Rejected {
            reason: RejectReason::NotRunning,
            detail: "no rapp is running".to_string(),
        })
        .unwrap();
        assert_eq!(rejected["outcome"], "rejected");
        assert_eq!(rejected["reason"], "not-running");

        let status = serde_json::to_value(Response::Status {
            state: LifecycleState::Running,
            rapp: Some("demo/talker".to_string()),
            robot: "turtle".to_string(),
        })
        .unwrap();
        assert_eq!(status["outcome"], "status");
        assert_eq!(status["state"], "running");
    }

    #[test]
    fn default_port_is_9421() {
        let manager = manager_with_policy(WhitelistPolicy::open());
        let server = RemoteControlServer::new(manager, "turtle");
        assert_eq!(server.port(), DEFAULT_PORT);
        let manager = manager_with_policy(WhitelistPolicy::open());
        assert_eq!(RemoteControlServer::new(manager, "turtle").with_port(7000).port(), 7000);
    }

    #[tokio::test]
    async fn end_to_end_over_websocket() {
        use tokio_tungstenite::connect_async;

        let manager = manager_with_policy(WhitelistPolicy::open());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                let (stream, peer) = listener.accept().await.unwrap();
                let _ = handle_client(stream, peer, manager, "turtle".to_string()).await;
            });
        }

        let (mut ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();
        ws.send(Message::Text(
            r#"{"op":"start","rapp":"demo/talker","hub":"gateway.alpha"}"#.into(),
        ))
        .await
        .unwrap();
        let reply = ws.next().await.unwrap().unwrap();
        let json: serde_json::Value =
            serde_json::from_str(reply.to_text().unwrap()).unwrap();
        assert_eq!(json["outcome"], "accepted");

        // A garbage frame is answered and the connection survives.
        ws.send(Message::Text("garbage".into())).await.unwrap();
        let reply = ws.next().await.unwrap().unwrap();
        let json: serde_json::Value =
            serde_json::from_str(reply.to_text().unwrap()).unwrap();
        assert_eq!(json["outcome"], "rejected");
        assert_eq!(json["reason"], "bad-request");

        ws.send(Message::Text(r#"{"op":"status"}"#.into())).await.unwrap();
        let reply = ws.next().await.unwrap().unwrap();
        let json: serde_json::Value =
            serde_json::from_str(reply.to_text().unwrap()).unwrap();
        assert_eq!(json["state"], "running");
        assert_eq!(json["rapp"], "demo/talker");
    }
}
