//! WebSocket JSON-RPC node client.
//!
//! One background task owns the socket per connection. Callers talk to it
//! over a command channel; responses come back on oneshot channels keyed by
//! request id, and `eth_subscription` notifications are routed through the
//! [`SubscriptionManager`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use blockwatch_core::{HeadSubscriber, HeadSubscription, LogFilter, LogSource, RawLog, WatchError};

use crate::request::{JsonRpcRequest, JsonRpcResponse};
use crate::subscriptions::{SubscriptionId, SubscriptionManager};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingMap = HashMap<u64, oneshot::Sender<JsonRpcResponse>>;

/// Command sent from callers to the background WS task.
enum WsCommand {
    Send {
        req: JsonRpcRequest,
        tx: oneshot::Sender<JsonRpcResponse>,
    },
    Close,
}

/// Handle to one live socket and its background task.
#[derive(Clone)]
struct Connection {
    cmd_tx: mpsc::UnboundedSender<WsCommand>,
    subscriptions: SubscriptionManager,
}

impl Connection {
    async fn open(url: &str) -> Result<Self, WatchError> {
        tracing::info!(url = %url, "connecting via WebSocket");
        let (ws_stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| WatchError::Connect {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<WsCommand>();
        let subscriptions = SubscriptionManager::new();
        let subs_clone = subscriptions.clone();
        let url = url.to_string();

        tokio::spawn(async move {
            ws_task(url, ws_stream, cmd_rx, subs_clone).await;
        });

        Ok(Self {
            cmd_tx,
            subscriptions,
        })
    }

    fn is_alive(&self) -> bool {
        !self.cmd_tx.is_closed()
    }

    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, WatchError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(WsCommand::Send { req, tx })
            .map_err(|_| WatchError::WebSocket("WS task closed".into()))?;
        rx.await
            .map_err(|_| WatchError::WebSocket("WS response dropped".into()))
    }
}

/// WebSocket JSON-RPC client for one node endpoint.
///
/// Implements both [`HeadSubscriber`] and [`LogSource`] over a single socket.
pub struct WsNodeClient {
    url: String,
    conn: Mutex<Connection>,
    req_id: AtomicU64,
}

impl WsNodeClient {
    /// Dial `url`. Fails if the node cannot be reached.
    pub async fn connect(url: impl Into<String>) -> Result<Self, WatchError> {
        let url = url.into();
        let conn = Connection::open(&url).await?;
        Ok(Self {
            url,
            conn: Mutex::new(conn),
            req_id: AtomicU64::new(1),
        })
    }

    /// Returns `true` while the current socket is up.
    pub async fn is_connected(&self) -> bool {
        self.conn.lock().await.is_alive()
    }

    /// Call `method` and deserialize the result.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, WatchError> {
        let conn = self.conn.lock().await.clone();
        self.call_on(&conn, method, params).await
    }

    async fn call_on<T: DeserializeOwned>(
        &self,
        conn: &Connection,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, WatchError> {
        let id = self.req_id.fetch_add(1, Ordering::Relaxed);
        let resp = conn.send(JsonRpcRequest::new(id, method, params)).await?;
        let result = resp.into_result()?;
        serde_json::from_value(result)
            .map_err(|e| WatchError::Malformed(format!("{method} result: {e}")))
    }

    /// Current connection, redialing once if the socket has died.
    async fn live_connection(&self) -> Result<Connection, WatchError> {
        let mut conn = self.conn.lock().await;
        if !conn.is_alive() {
            tracing::info!(url = %self.url, "WS connection is down, redialing");
            *conn = Connection::open(&self.url).await?;
        }
        Ok(conn.clone())
    }
}

impl Drop for WsNodeClient {
    fn drop(&mut self) {
        let _ = self.conn.get_mut().cmd_tx.send(WsCommand::Close);
    }
}

#[async_trait]
impl HeadSubscriber for WsNodeClient {
    async fn subscribe_heads(&self) -> Result<HeadSubscription, WatchError> {
        let conn = self.live_connection().await?;
        let id: String = self
            .call_on(&conn, "eth_subscribe", vec![Value::String("newHeads".into())])
            .await
            .map_err(|e| match e {
                WatchError::Rpc { .. } | WatchError::Malformed(_) => {
                    WatchError::Subscribe(e.to_string())
                }
                other => other,
            })?;

        let (headers, errors) = conn.subscriptions.register(SubscriptionId(id.clone()));
        tracing::debug!(subscription = %id, "subscribed to newHeads");
        Ok(HeadSubscription {
            id,
            headers,
            errors,
        })
    }

    async fn unsubscribe(&self, id: &str) -> Result<(), WatchError> {
        let conn = self.conn.lock().await.clone();
        conn.subscriptions.remove(&SubscriptionId(id.to_string()));
        if !conn.is_alive() {
            return Ok(());
        }
        let removed: bool = self
            .call_on(&conn, "eth_unsubscribe", vec![Value::String(id.to_string())])
            .await?;
        if !removed {
            tracing::debug!(subscription = %id, "node did not know subscription");
        }
        Ok(())
    }
}

#[async_trait]
impl LogSource for WsNodeClient {
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, WatchError> {
        let filter = serde_json::to_value(filter)
            .map_err(|e| WatchError::Malformed(format!("log filter: {e}")))?;
        self.call("eth_getLogs", vec![filter]).await
    }
}

/// Background task that owns the WebSocket connection.
async fn ws_task(
    url: String,
    ws_stream: WsStream,
    mut cmd_rx: mpsc::UnboundedReceiver<WsCommand>,
    subscriptions: SubscriptionManager,
) {
    let mut pending = PendingMap::new();
    let (mut sink, mut stream) = ws_stream.split();

    let reason = loop {
        tokio::select! {
            // Incoming commands from callers
            cmd = cmd_rx.recv() => {
                match cmd {
                    None | Some(WsCommand::Close) => {
                        let _ = sink.send(Message::Close(None)).await;
                        break "client closed".to_string();
                    }
                    Some(WsCommand::Send { req, tx }) => {
                        track(&mut pending, req.id, tx);
                        if let Ok(msg) = serde_json::to_string(&req) {
                            if let Err(e) = sink.send(Message::Text(msg.into())).await {
                                break format!("send failed: {e}");
                            }
                        }
                    }
                }
            }
            // Incoming messages from node
            msg = stream.next() => {
                match msg {
                    None => break "stream ended".to_string(),
                    Some(Err(e)) => break format!("receive error: {e}"),
                    Some(Ok(Message::Text(text))) => {
                        handle_message(text.as_str(), &mut pending, &subscriptions);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) => break "closed by node".to_string(),
                    Some(Ok(_)) => {}
                }
            }
        }
    };

    tracing::warn!(url = %url, reason = %reason, "WS disconnected");
    // Mark the connection dead before subscribers hear about it, so a
    // resubscribe always redials. Dropping `pending` fails in-flight calls.
    drop(cmd_rx);
    drop(pending);
    subscriptions.fail_all(&reason);
}

/// Remember `tx` for response `id`, forgetting callers that gave up
/// waiting (e.g. a timed-out log query).
fn track(pending: &mut PendingMap, id: u64, tx: oneshot::Sender<JsonRpcResponse>) {
    pending.retain(|_, waiting| !waiting.is_closed());
    pending.insert(id, tx);
}

fn handle_message(text: &str, pending: &mut PendingMap, subscriptions: &SubscriptionManager) {
    let Ok(val) = serde_json::from_str::<Value>(text) else {
        tracing::debug!("failed to parse WS message as JSON");
        return;
    };

    if val.get("method").and_then(|m| m.as_str()) == Some("eth_subscription") {
        if let Some(params) = val.get("params") {
            if let Some(id) = params["subscription"].as_str() {
                subscriptions.dispatch(&SubscriptionId(id.to_string()), params["result"].clone());
            }
        }
        return;
    }

    match serde_json::from_value::<JsonRpcResponse>(val) {
        Ok(resp) => {
            let Some(id) = resp.id.as_u64() else {
                return;
            };
            if let Some(tx) = pending.remove(&id) {
                let _ = tx.send(resp);
            }
        }
        Err(e) => tracing::debug!(error = %e, "unrecognised WS message"),
    }
}
