//! [`WsHubClient`] – the hub wire protocol over a WebSocket.
//!
//! Frames are single JSON objects tagged with an `"op"` field:
//!
//! ```json
//! {"op": "connect",   "name": "turtle-3f2a91bc"}
//! {"op": "advertise", "endpoint": "turtle-3f2a91bc/demo/talker"}
//! {"op": "withdraw",  "endpoint": "turtle-3f2a91bc/demo/talker"}
//! ```
//!
//! Every connect attempt is bounded by a deadline; the client never retries
//! on its own.  A background read task watches the stream half and flags the
//! connection as lost when the hub closes it or the transport errors, which
//! the watch loop picks up on its next tick.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rappman_types::{ConnectionError, RobotIdentity};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Default deadline for a single connection attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// WebSocket-backed [`HubClient`][crate::hub::HubClient].
pub struct WsHubClient {
    url: String,
    connect_timeout: Duration,
    connected: Arc<AtomicBool>,
    sink: Mutex<Option<WsSink>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    loss_tx: broadcast::Sender<()>,
}

impl WsHubClient {
    pub fn new(url: impl Into<String>) -> Self {
        let (loss_tx, _) = broadcast::channel(8);
        Self {
            url: url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            connected: Arc::new(AtomicBool::new(false)),
            sink: Mutex::new(None),
            reader: Mutex::new(None),
            loss_tx,
        }
    }

    /// Override the per-attempt connection deadline (builder-style).
    pub fn with_connect_timeout(mut self, deadline: Duration) -> Self {
        self.connect_timeout = deadline;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send one op frame, surfacing transport failure as connection loss.
    async fn send_frame(&self, frame: serde_json::Value) -> Result<(), ConnectionError> {
        let mut sink = self.sink.lock().await;
        let Some(ws_tx) = sink.as_mut() else {
            return Err(ConnectionError::NotConnected);
        };
        let text = frame.to_string();
        if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
            *sink = None;
            self.connected.store(false, Ordering::SeqCst);
            let _ = self.loss_tx.send(());
            return Err(ConnectionError::Unreachable {
                detail: format!("send to {}: {e}", self.url),
            });
        }
        Ok(())
    }

    /// Drain the stream half until the hub goes away, then flag the loss.
    async fn read_until_closed(
        mut ws_rx: SplitStream<WsStream>,
        connected: Arc<AtomicBool>,
        loss_tx: broadcast::Sender<()>,
        url: String,
    ) {
        loop {
            match ws_rx.next().await {
                Some(Ok(Message::Close(_))) | None => {
                    info!(url = %url, "hub closed the connection");
                    break;
                }
                Some(Err(e)) => {
                    warn!(url = %url, error = %e, "hub connection errored");
                    break;
                }
                Some(Ok(other)) => {
                    debug!(url = %url, frame = ?other, "ignoring hub frame");
                }
            }
        }
        connected.store(false, Ordering::SeqCst);
        let _ = loss_tx.send(());
    }
}

#[async_trait]
impl crate::hub::HubClient for WsHubClient {
    async fn connect(&self, identity: &RobotIdentity) -> Result<(), ConnectionError> {
        let attempt = timeout(self.connect_timeout, connect_async(self.url.as_str())).await;
        let ws_stream = match attempt {
            Err(_) => return Err(ConnectionError::Timeout),
            Ok(Err(e)) => {
                return Err(ConnectionError::Unreachable {
                    detail: format!("{}: {e}", self.url),
                });
            }
            Ok(Ok((stream, _response))) => stream,
        };

        let (ws_tx, ws_rx) = ws_stream.split();
        {
            let mut sink = self.sink.lock().await;
            *sink = Some(ws_tx);
        }
        // A stale reader from a previous connection would report the old
        // stream's shutdown as a fresh loss.
        {
            let mut reader = self.reader.lock().await;
            if let Some(old) = reader.take() {
                old.abort();
            }
            *reader = Some(tokio::spawn(Self::read_until_closed(
                ws_rx,
                Arc::clone(&self.connected),
                self.loss_tx.clone(),
                self.url.clone(),
            )));
        }
        self.connected.store(true, Ordering::SeqCst);

        self.send_frame(json!({
            "op": "connect",
            "name": identity.effective_name(),
        }))
        .await?;
        info!(url = %self.url, robot = %identity, "registered with hub");
        Ok(())
    }

    async fn advertise(&self, endpoint: &str) -> Result<(), ConnectionError> {
        self.send_frame(json!({ "op": "advertise", "endpoint": endpoint }))
            .await
    }

    async fn withdraw(&self, endpoint: &str) -> Result<(), ConnectionError> {
        self.send_frame(json!({ "op": "withdraw", "endpoint": endpoint }))
            .await
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn subscribe_connection_loss(&self) -> broadcast::Receiver<()> {
        self.loss_tx.subscribe()
    }
}
