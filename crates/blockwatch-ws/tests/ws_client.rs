//! Integration tests for `WsNodeClient` against an in-process node.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use blockwatch_core::{
    HeadSubscriber, HeadWatcher, LogFilter, LogMatch, LogSource, MatchReporter,
    MemoryCheckpointStore, TargetAddress, WatchError, WatcherConfig,
};
use blockwatch_ws::WsNodeClient;

const TARGET: &str = "0x1f9840a85d5af5bf1d1762f925bdaddc4201f984";
const WAIT: Duration = Duration::from_secs(5);

struct MockNode {
    url: String,
    connections: Arc<AtomicUsize>,
}

/// Start a node that answers `eth_subscribe`, `eth_getLogs` and
/// `eth_unsubscribe`. Every subscription immediately receives head 0x10.
/// With `drop_first`, the first connection is closed right after that head.
async fn spawn_node(drop_first: bool) -> MockNode {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&connections);

    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::spawn(serve(tcp, n, drop_first && n == 1));
        }
    });

    MockNode {
        url: format!("ws://{addr}"),
        connections,
    }
}

async fn send(ws: &mut WebSocketStream<TcpStream>, v: Value) {
    let _ = ws.send(Message::Text(v.to_string().into())).await;
}

async fn serve(tcp: TcpStream, conn: usize, close_after_subscribe: bool) {
    let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
    while let Some(Ok(msg)) = ws.next().await {
        let Message::Text(text) = msg else { continue };
        let req: Value = serde_json::from_str(text.as_str()).unwrap();
        let id = req["id"].clone();

        match req["method"].as_str().unwrap_or_default() {
            "eth_subscribe" => {
                let sub = format!("0xsub{conn}");
                send(&mut ws, json!({"jsonrpc": "2.0", "id": id, "result": sub})).await;
                send(
                    &mut ws,
                    json!({
                        "jsonrpc": "2.0",
                        "method": "eth_subscription",
                        "params": {"subscription": sub, "result": {"number": "0x10", "hash": "0xaa"}}
                    }),
                )
                .await;
                if close_after_subscribe {
                    let _ = ws.close(None).await;
                    return;
                }
            }
            "eth_getLogs" => {
                let filter = &req["params"][0];
                send(
                    &mut ws,
                    json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": [{
                            "address": filter["address"],
                            "topics": [],
                            "data": "0x",
                            "blockNumber": filter["fromBlock"],
                            "blockHash": "0xaa",
                            "transactionHash": "0xfeed",
                            "logIndex": "0x0",
                            "removed": false
                        }]
                    }),
                )
                .await;
            }
            "eth_unsubscribe" => {
                send(&mut ws, json!({"jsonrpc": "2.0", "id": id, "result": true})).await;
            }
            other => {
                send(
                    &mut ws,
                    json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {"code": -32601, "message": format!("the method {other} does not exist")}
                    }),
                )
                .await;
            }
        }
    }
}

#[tokio::test]
async fn unreachable_endpoint_is_a_connect_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = WsNodeClient::connect(format!("ws://{addr}"))
        .await
        .err()
        .expect("connect should fail");
    assert!(matches!(err, WatchError::Connect { .. }));
}

#[tokio::test]
async fn subscribe_delivers_heads_and_get_logs_queries_one_block() {
    let node = spawn_node(false).await;
    let client = WsNodeClient::connect(&node.url).await.unwrap();

    let mut sub = client.subscribe_heads().await.unwrap();
    assert_eq!(sub.id, "0xsub1");
    let head = tokio::time::timeout(WAIT, sub.headers.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(head.number, 16);
    assert_eq!(head.hash, "0xaa");

    let target: TargetAddress = TARGET.parse().unwrap();
    let logs = client
        .get_logs(&LogFilter::single_block(target, 16))
        .await
        .unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].tx_hash, "0xfeed");
    assert_eq!(logs[0].block_number, "0x10");
    assert_eq!(logs[0].address, TARGET);

    client.unsubscribe(&sub.id).await.unwrap();
}

#[tokio::test]
async fn unknown_method_surfaces_rpc_error() {
    let node = spawn_node(false).await;
    let client = WsNodeClient::connect(&node.url).await.unwrap();

    let err = client
        .call::<Value>("eth_chainId", vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, WatchError::Rpc { code: -32601, .. }));
}

#[tokio::test]
async fn closed_socket_fails_subscription_and_resubscribe_redials() {
    let node = spawn_node(true).await;
    let client = WsNodeClient::connect(&node.url).await.unwrap();

    let mut sub = client.subscribe_heads().await.unwrap();
    let head = tokio::time::timeout(WAIT, sub.headers.recv()).await.unwrap();
    assert_eq!(head.map(|h| h.number), Some(16));

    let err = tokio::time::timeout(WAIT, sub.errors.recv()).await.unwrap();
    assert!(matches!(err, Some(WatchError::WebSocket(_))));
    let closed = tokio::time::timeout(WAIT, sub.headers.recv()).await.unwrap();
    assert!(closed.is_none());
    assert!(!client.is_connected().await);

    let mut again = client.subscribe_heads().await.unwrap();
    assert_eq!(again.id, "0xsub2");
    assert_eq!(node.connections.load(Ordering::SeqCst), 2);
    let head = tokio::time::timeout(WAIT, again.headers.recv()).await.unwrap();
    assert_eq!(head.map(|h| h.number), Some(16));
}

struct ChannelReporter(mpsc::UnboundedSender<String>);

impl MatchReporter for ChannelReporter {
    fn report(&self, m: &LogMatch) {
        let _ = self.0.send(m.to_string());
    }
}

#[tokio::test]
async fn watcher_reports_match_end_to_end() {
    let node = spawn_node(false).await;
    let client = Arc::new(WsNodeClient::connect(&node.url).await.unwrap());
    let store = Arc::new(MemoryCheckpointStore::with_height(15));
    let config = WatcherConfig::new(&node.url, TARGET.parse().unwrap());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut watcher = HeadWatcher::new(
        &config,
        Arc::clone(&client),
        Arc::clone(&client),
        Box::new(Arc::clone(&store)),
    )
    .with_reporter(Box::new(ChannelReporter(tx)));

    let line = tokio::select! {
        res = watcher.run() => panic!("watcher exited: {res:?}"),
        line = tokio::time::timeout(WAIT, rx.recv()) => line.unwrap().unwrap(),
    };
    assert_eq!(line, "New TX: 0xfeed | Block: 16");
}
