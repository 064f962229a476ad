//! Shared helpers for the integration suite: a gateway spawned on an
//! ephemeral port, a WebSocket client, and JSON send/receive utilities.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use tickgate::app::{router, AppState};
use tickgate::config::Config;

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(10);

/// Config with all databases under a temp dir and a fast deterministic mock.
pub fn test_config() -> (TempDir, Config) {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = Config::default();
    config.auth_db_path = path_in(&dir, "auth.db");
    config.paper_db_path = path_in(&dir, "paper_trades.db");
    config.mock_db_path = path_in(&dir, "mock_trades.db");
    config.instruments_csv = path_in(&dir, "instruments.csv");
    config.mock.symbols = vec!["MOCK".to_string()];
    config.mock.seed = Some(42);
    config.mock.interval_seconds = 0.05;
    (dir, config)
}

pub fn path_in(dir: &TempDir, name: &str) -> String {
    dir.path().join(name).to_string_lossy().into_owned()
}

/// Boot the gateway on an ephemeral port and return its address plus state.
pub async fn spawn_gateway(config: Config) -> (SocketAddr, AppState) {
    let state = AppState::new(config).expect("app state");
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind gateway");
    let addr = listener.local_addr().expect("local addr");
    let app = router(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, state)
}

pub async fn connect(addr: SocketAddr) -> WsClient {
    let (ws, _) = connect_async(format!("ws://{addr}/"))
        .await
        .expect("websocket connect");
    ws
}

pub async fn send_json(ws: &mut WsClient, value: Value) {
    ws.send(Message::Text(value.to_string()))
        .await
        .expect("send frame");
}

/// Next text frame parsed as JSON; panics after `RECV_TIMEOUT` or on close.
pub async fn next_json(ws: &mut WsClient) -> Value {
    loop {
        let message = tokio::time::timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).expect("frame is JSON");
        }
    }
}

/// Read frames until `predicate` matches, bounded by `limit` messages.
pub async fn find_frame<F>(ws: &mut WsClient, limit: usize, predicate: F) -> Option<Value>
where
    F: Fn(&Value) -> bool,
{
    for _ in 0..limit {
        let frame = next_json(ws).await;
        if predicate(&frame) {
            return Some(frame);
        }
    }
    None
}
