//! Shared harness for integration tests: in-process server on a random
//! port, REST registration helpers, and WebSocket event plumbing.

use futures_util::StreamExt;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
pub type WsWrite = futures_util::stream::SplitSink<WsStream, Message>;
pub type WsRead = futures_util::stream::SplitStream<WsStream>;

/// Start the server on a random port and return (base_url, addr).
pub async fn start_test_server() -> (String, SocketAddr) {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = convo_server::db::init_db(&data_dir).expect("Failed to init DB");
    let jwt_secret = convo_server::auth::jwt::load_or_generate_jwt_secret(&data_dir)
        .expect("Failed to generate JWT secret");

    let broker: Arc<dyn convo_server::broker::Broker> =
        Arc::new(convo_server::broker::memory::MemoryBroker::new());
    let registry = Arc::new(convo_server::ws::ConnectionRegistry::new());
    let rooms = Arc::new(convo_server::ws::rooms::RoomMembership::new());
    let process_id = "test-process".to_string();
    let presence = Arc::new(convo_server::chat::presence::PresenceTracker::new(
        broker.clone(),
        process_id.clone(),
        Duration::from_secs(86400),
    ));
    let fanout = Arc::new(convo_server::chat::fanout::FanoutEngine::new(
        registry.clone(),
        rooms.clone(),
        broker.clone(),
        process_id,
    ));
    tokio::spawn(fanout.clone().run_relay());

    let state = convo_server::state::AppState {
        db,
        jwt_secret,
        registry,
        rooms,
        presence,
        fanout,
    };

    let app = convo_server::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        let _keep = tmp_dir;
    });

    let base_url = format!("http://{}", addr);
    (base_url, addr)
}

/// Register a user and return (access_token, user_id).
pub async fn register_user(base_url: &str, email: &str, nickname: &str) -> (String, i64) {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/auth/register", base_url))
        .json(&json!({
            "email": email,
            "nickname": nickname,
            "password": "correct horse",
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 201, "Registration failed for {}", nickname);
    let body: serde_json::Value = resp.json().await.unwrap();
    let access_token = body["access_token"].as_str().unwrap().to_string();
    let user_id = body["user"]["id"].as_i64().unwrap();
    (access_token, user_id)
}

/// Open an authenticated WebSocket connection.
pub async fn connect_ws(addr: SocketAddr, token: &str) -> (WsWrite, WsRead) {
    let ws_url = format!("ws://{}/ws?token={}", addr, token);
    let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream.split()
}

/// Read the next JSON text frame, skipping control frames. None on timeout.
pub async fn next_event(read: &mut WsRead) -> Option<serde_json::Value> {
    loop {
        match tokio::time::timeout(Duration::from_secs(2), read.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                return serde_json::from_str(text.as_str()).ok();
            }
            Ok(Some(Ok(_))) => continue,
            _ => return None,
        }
    }
}

/// Read frames until one with the given event name arrives. Other events
/// (presence broadcasts from parallel connections etc.) are skipped.
pub async fn wait_for_event(read: &mut WsRead, name: &str) -> serde_json::Value {
    for _ in 0..20 {
        match next_event(read).await {
            Some(event) if event["event"] == name => return event,
            Some(_) => continue,
            None => break,
        }
    }
    panic!("Did not receive {} event", name);
}

/// Assert that no frame with the given event name arrives within a short
/// window. Other events within the window are ignored.
pub async fn assert_no_event(read: &mut WsRead, name: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(500);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return;
        }
        match tokio::time::timeout(remaining, read.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                let event: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
                assert_ne!(event["event"], name, "Unexpected {} event", name);
            }
            Ok(Some(Ok(_))) => continue,
            _ => return,
        }
    }
}
