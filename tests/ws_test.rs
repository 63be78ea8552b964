//! Integration tests for WebSocket connection, auth, ping/pong, and cleanup.

mod common;

use common::*;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

#[tokio::test]
async fn test_ws_connection_with_valid_jwt() {
    let (base_url, addr) = start_test_server().await;
    let (access_token, user_id) = register_user(&base_url, "ws1@example.com", "WsUser1").await;

    let (_write, mut read) = connect_ws(addr, &access_token).await;

    // First frame after auth is the online-users snapshot, containing us.
    let event = wait_for_event(&mut read, "online_users").await;
    let ids: Vec<i64> = serde_json::from_value(event["data"].clone()).unwrap();
    assert!(ids.contains(&user_id), "Snapshot should include ourselves");

    // Connection should stay open with no further messages
    let result = tokio::time::timeout(Duration::from_millis(500), read.next()).await;
    assert!(result.is_err(), "Expected timeout after snapshot, got message");
}

#[tokio::test]
async fn test_ws_auth_failure_invalid_token() {
    let (_base_url, addr) = start_test_server().await;

    let ws_url = format!("ws://{}/ws?token=invalid_jwt_token", addr);
    let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect("WebSocket should upgrade even with invalid token");

    let (mut _write, mut read) = ws_stream.split();

    // Server should immediately send a close frame with code 4002 (token invalid)
    let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
        .await
        .expect("Expected close message within timeout");

    match msg {
        Some(Ok(Message::Close(Some(frame)))) => {
            assert_eq!(
                frame.code,
                tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode::from(4002),
                "Expected close code 4002 (token invalid)"
            );
        }
        Some(Ok(Message::Close(None))) => {
            // Close without frame — acceptable for invalid token
        }
        other => {
            if let Some(Ok(msg)) = other {
                assert!(msg.is_close(), "Expected close message, got: {:?}", msg);
            }
        }
    }
}

#[tokio::test]
async fn test_ws_ping_pong() {
    let (base_url, addr) = start_test_server().await;
    let (access_token, _user_id) = register_user(&base_url, "ping@example.com", "PingUser").await;

    let (mut write, mut read) = connect_ws(addr, &access_token).await;
    wait_for_event(&mut read, "online_users").await;

    write
        .send(Message::Ping(vec![42, 43, 44].into()))
        .await
        .expect("Failed to send ping");

    let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
        .await
        .expect("Expected pong within timeout");

    match msg {
        Some(Ok(Message::Pong(data))) => {
            assert_eq!(data.as_ref(), &[42, 43, 44], "Pong data should match ping");
        }
        other => {
            panic!("Expected Pong message, got: {:?}", other);
        }
    }
}

#[tokio::test]
async fn test_ws_malformed_frame_does_not_kill_connection() {
    let (base_url, addr) = start_test_server().await;
    let (access_token, _user_id) = register_user(&base_url, "mal@example.com", "MalUser").await;

    let (mut write, mut read) = connect_ws(addr, &access_token).await;
    wait_for_event(&mut read, "online_users").await;

    write
        .send(Message::Text("this is not json".into()))
        .await
        .expect("Failed to send garbage");
    write
        .send(Message::Text(r#"{"event":"no_such_event","data":{}}"#.into()))
        .await
        .expect("Failed to send unknown event");

    // Connection survives: a ping still gets its pong back
    write
        .send(Message::Ping(vec![7].into()))
        .await
        .expect("Failed to send ping");
    let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
        .await
        .expect("Expected pong within timeout");
    assert!(
        matches!(msg, Some(Ok(Message::Pong(_)))),
        "Connection should still answer pings after malformed frames"
    );
}

#[tokio::test]
async fn test_ws_connection_cleanup_on_disconnect() {
    let (base_url, addr) = start_test_server().await;
    let (access_token, user_id) =
        register_user(&base_url, "cleanup@example.com", "CleanupUser").await;

    // Connect and then immediately close
    {
        let (mut write, mut read) = connect_ws(addr, &access_token).await;
        wait_for_event(&mut read, "online_users").await;
        write
            .send(Message::Close(None))
            .await
            .expect("Failed to send close");
    }

    // Give the server a moment to clean up
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Reconnect works, and the snapshot shows only ourselves — the first
    // connection's presence record was fully removed.
    let (_write2, mut read2) = connect_ws(addr, &access_token).await;
    let event = wait_for_event(&mut read2, "online_users").await;
    let ids: Vec<i64> = serde_json::from_value(event["data"].clone()).unwrap();
    assert_eq!(ids, vec![user_id], "Stale presence should be cleaned up");
}
