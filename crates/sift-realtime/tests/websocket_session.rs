//! End-to-end tests against a real WebSocket server on localhost.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use sift_core::{Principal, StaticIdentity};
use sift_realtime::{
    ConnectionState, Envelope, FileClientIdStore, SessionKey, SessionManager, decode, encode,
};
use sift_settings::{ReconnectSettings, RealtimeSettings};

const TIMEOUT: Duration = Duration::from_secs(5);

struct Accepted {
    query: HashMap<String, String>,
    ws: WebSocketStream<TcpStream>,
}

async fn accept(listener: &TcpListener) -> Accepted {
    let (stream, _) = timeout(TIMEOUT, listener.accept()).await.unwrap().unwrap();
    let captured = Arc::new(Mutex::new(String::new()));
    let sink = Arc::clone(&captured);
    let ws = tokio_tungstenite::accept_hdr_async(
        stream,
        move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            *sink.lock() = req.uri().query().unwrap_or_default().to_owned();
            Ok(resp)
        },
    )
    .await
    .unwrap();
    let query = url::form_urlencoded::parse(captured.lock().as_bytes())
        .into_owned()
        .collect();
    Accepted { query, ws }
}

/// Next text frame from the client, skipping control frames.
async fn next_envelope(ws: &mut WebSocketStream<TcpStream>) -> Envelope {
    loop {
        let msg = timeout(TIMEOUT, ws.next()).await.unwrap().unwrap().unwrap();
        if let Message::Text(text) = msg {
            return decode(text.as_str());
        }
    }
}

async fn wait_for_state(manager: &SessionManager, state: ConnectionState) {
    let mut rx = manager.state_changes();
    let _ = timeout(TIMEOUT, rx.wait_for(|s| *s == state))
        .await
        .unwrap()
        .unwrap();
}

fn settings_for(listener: &TcpListener) -> RealtimeSettings {
    let addr = listener.local_addr().unwrap();
    RealtimeSettings {
        url: format!("ws://{addr}/ws"),
        reconnect: ReconnectSettings {
            first_delay_ms: 50,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            ..ReconnectSettings::default()
        },
        ..RealtimeSettings::default()
    }
}

fn resolve_key(dir: &std::path::Path, workspace: &str) -> SessionKey {
    let store = FileClientIdStore::new(dir);
    let identity = StaticIdentity::new(Principal::new("u1"));
    SessionKey::resolve(&identity, workspace, &store).unwrap()
}

#[tokio::test]
async fn events_flow_both_ways() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let manager = SessionManager::with_websocket(settings_for(&listener)).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _sub = manager.on_progress(move |p| {
        let _ = tx.send(p.clone());
    });

    let dir = tempfile::tempdir().unwrap();
    let key = resolve_key(dir.path(), "w1");
    manager.connect(key.clone());

    let mut server = accept(&listener).await;
    assert_eq!(server.query["principalId"], "u1");
    assert_eq!(server.query["workspaceId"], "w1");
    assert_eq!(server.query["clientId"], key.client_id.as_str());
    assert!(server.query["t"].parse::<i64>().is_ok());

    let subscribe = next_envelope(&mut server.ws).await;
    assert_eq!(subscribe.event_type(), "subscribe");
    assert_eq!(subscribe.payload()["workspaceId"], "w1");

    let frame = encode("progress_update", json!({"stage": "crawl", "percent": 40})).unwrap();
    server.ws.send(Message::Text(frame.into())).await.unwrap();
    let progress = timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(progress.stage.as_deref(), Some("crawl"));
    assert_eq!(progress.percent, Some(40.0));

    assert_eq!(manager.current_state(), ConnectionState::Open);
    assert!(manager.cancel_operation("op-1"));
    let cancel = next_envelope(&mut server.ws).await;
    assert_eq!(cancel.event_type(), "cancel_operation");
    assert_eq!(cancel.payload()["operationId"], "op-1");

    server
        .ws
        .close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "done".into(),
        }))
        .await
        .unwrap();
    wait_for_state(&manager, ConnectionState::Idle).await;
    assert!(!manager.send("x", json!({})));
}

#[tokio::test]
async fn abrupt_drop_reconnects_with_same_client_id() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let manager = SessionManager::with_websocket(settings_for(&listener)).unwrap();
    let dir = tempfile::tempdir().unwrap();
    manager.connect(resolve_key(dir.path(), "w1"));

    let mut first = accept(&listener).await;
    let _ = next_envelope(&mut first.ws).await;
    let client_id = first.query["clientId"].clone();
    drop(first);

    let mut second = accept(&listener).await;
    assert_eq!(second.query["clientId"], client_id);
    let subscribe = next_envelope(&mut second.ws).await;
    assert_eq!(subscribe.event_type(), "subscribe");
    wait_for_state(&manager, ConnectionState::Open).await;

    // The id survives a fresh store over the same directory.
    assert_eq!(resolve_key(dir.path(), "w2").client_id.as_str(), client_id);

    manager.shutdown().await;
    let msg = timeout(TIMEOUT, second.ws.next()).await.unwrap().unwrap().unwrap();
    match msg {
        Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Normal),
        other => panic!("expected close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_server_fails_after_budget() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut settings = settings_for(&listener);
    drop(listener);
    settings.reconnect.max_attempts = 2;

    let manager = SessionManager::with_websocket(settings).unwrap();
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&states);
    let _sub = manager.on_connectivity(move |c| sink.lock().push(c.state));

    manager.connect(SessionKey::new("u1", "w1", "c1"));
    wait_for_state(&manager, ConnectionState::Failed).await;
    assert_eq!(manager.reconnect_attempts(), 2);
    assert_eq!(*states.lock(), vec![ConnectionState::Failed]);
}
