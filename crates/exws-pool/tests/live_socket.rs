//! End-to-end tests over a real WebSocket server and the tungstenite
//! transport.

use exws_pool::{
    init_crypto, ConnectionPool, ConnectionRecord, MessageHandler, PoolConfig,
    TungsteniteTransport,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Echo server: replies to every text frame with `{id, status: 200,
/// result: {echo}}`.
struct EchoServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    received: Arc<Mutex<Vec<String>>>,
}

impl EchoServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let received_clone = received.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        tokio::spawn(handle_connection(stream, received_clone.clone()));
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            received,
        }
    }

    fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    async fn received_messages(&self) -> Vec<String> {
        self.received.lock().await.clone()
    }

    async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(stream: TcpStream, received: Arc<Mutex<Vec<String>>>) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {e}");
            return;
        }
    };
    let (mut write, mut read) = ws_stream.split();

    while let Some(Ok(msg)) = read.next().await {
        if let Message::Text(text) = msg {
            received.lock().await.push(text.clone());
            if let Ok(parsed) = serde_json::from_str::<Value>(&text) {
                if let Some(id) = parsed.get("id") {
                    let reply = json!({
                        "id": id,
                        "status": 200,
                        "result": {"echo": parsed.get("method")}
                    });
                    if write.send(Message::Text(reply.to_string())).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

/// Correlates replies back to pending requests by id.
struct CorrelatingHandler;

impl MessageHandler for CorrelatingHandler {
    fn on_message(&self, pool: &ConnectionPool, connection: &Arc<ConnectionRecord>, raw: &str) {
        let Ok(msg) = serde_json::from_str::<Value>(raw) else {
            return;
        };
        if let Some(id) = msg.get("id").and_then(Value::as_str) {
            let id = id.to_string();
            pool.complete_request(connection, &id, Ok(msg));
        }
    }
}

fn live_pool(size: usize) -> ConnectionPool {
    init_crypto();
    let config = PoolConfig {
        mode: if size > 1 {
            exws_core::WsMode::Pool
        } else {
            exws_core::WsMode::Single
        },
        pool_size: size,
        ..Default::default()
    };
    ConnectionPool::new(
        config,
        Arc::new(TungsteniteTransport::new()),
        Arc::new(CorrelatingHandler),
    )
}

#[tokio::test]
async fn test_request_reply_over_real_socket() {
    let server = EchoServer::start().await;
    let pool = live_pool(1);
    pool.connect_pool(&server.url(), None).await.unwrap();
    assert!(pool.is_connected(None));

    let payload = json!({"id": "live-1", "method": "ping"}).to_string();
    let reply = pool
        .send_request(&payload, "live-1", Some(Duration::from_secs(5)), None)
        .await
        .unwrap();
    assert_eq!(reply["status"], 200);
    assert_eq!(reply["result"]["echo"], "ping");

    let received = server.received_messages().await;
    assert_eq!(received.len(), 1);

    pool.disconnect().await;
    assert!(!pool.is_connected(None));
    server.shutdown().await;
}

#[tokio::test]
async fn test_pool_distributes_over_real_sockets() {
    let server = EchoServer::start().await;
    let pool = live_pool(2);
    pool.connect_pool(&server.url(), None).await.unwrap();

    for i in 0..4 {
        let id = format!("live-{i}");
        let payload = json!({"id": id, "method": "ping"}).to_string();
        pool.send_request(&payload, &id, Some(Duration::from_secs(5)), None)
            .await
            .unwrap();
    }
    assert_eq!(server.received_messages().await.len(), 4);

    pool.disconnect().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_connect_fails_against_closed_port() {
    let pool = live_pool(1);
    // Bind then drop a listener so the port is closed.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        pool.connect_pool(&url, None),
    )
    .await
    .expect("connect should fail promptly");
    assert!(result.is_err());
}
