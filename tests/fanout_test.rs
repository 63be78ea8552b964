//! Integration tests for event fan-out: room delivery and isolation,
//! typing lifecycle, deletions, read receipts, and friend notifications.

mod common;

use common::*;
use futures_util::SinkExt;
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;

/// Create a 1:1 room via REST and return its id.
async fn create_room(base_url: &str, token: &str, friend_id: i64) -> i64 {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/chatrooms", base_url))
        .bearer_auth(token)
        .json(&json!({ "friendId": friend_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: serde_json::Value = resp.json().await.unwrap();
    body["chatRoomId"].as_i64().unwrap()
}

/// Post a message via REST and return its payload.
async fn send_message(
    base_url: &str,
    token: &str,
    chat_room_id: i64,
    content: &str,
) -> serde_json::Value {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/messages", base_url))
        .bearer_auth(token)
        .json(&json!({ "chatRoomId": chat_room_id, "content": content }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    resp.json().await.unwrap()
}

/// Send a join_room frame.
async fn join_room(write: &mut WsWrite, chat_room_id: i64) {
    let frame = json!({ "event": "join_room", "data": { "chatRoomId": chat_room_id } });
    write
        .send(Message::Text(frame.to_string().into()))
        .await
        .expect("Failed to send join_room");
}

#[tokio::test]
async fn test_room_fanout_and_channel_isolation() {
    let (base_url, addr) = start_test_server().await;
    let (alice_token, _alice_id) = register_user(&base_url, "alice@example.com", "Alice").await;
    let (bob_token, bob_id) = register_user(&base_url, "bob@example.com", "Bob").await;
    let (carol_token, _carol_id) = register_user(&base_url, "carol@example.com", "Carol").await;

    let room_id = create_room(&base_url, &alice_token, bob_id).await;

    let (mut alice_write, mut alice_read) = connect_ws(addr, &alice_token).await;
    wait_for_event(&mut alice_read, "online_users").await;
    let (mut bob_write, mut bob_read) = connect_ws(addr, &bob_token).await;
    wait_for_event(&mut bob_read, "online_users").await;
    let (_carol_write, mut carol_read) = connect_ws(addr, &carol_token).await;
    wait_for_event(&mut carol_read, "online_users").await;

    join_room(&mut alice_write, room_id).await;
    join_room(&mut bob_write, room_id).await;
    // Bob's join notice confirms both joins completed
    let event = wait_for_event(&mut alice_read, "user_joined").await;
    assert_eq!(event["data"]["userId"], bob_id);

    send_message(&base_url, &alice_token, room_id, "hello room").await;

    // Both room members receive the message on the room channel
    let event = wait_for_event(&mut alice_read, "new_message").await;
    assert_eq!(event["data"]["content"], "hello room");
    let event = wait_for_event(&mut bob_read, "new_message").await;
    assert_eq!(event["data"]["content"], "hello room");
    assert_eq!(event["data"]["chatRoomId"], room_id);
    assert_eq!(event["data"]["sender"]["nickname"], "Alice");

    // Carol is neither a member nor a friend: nothing reaches her
    assert_no_event(&mut carol_read, "new_message").await;
}

#[tokio::test]
async fn test_double_join_delivers_once() {
    let (base_url, addr) = start_test_server().await;
    let (alice_token, _alice_id) = register_user(&base_url, "alice@example.com", "Alice").await;
    let (bob_token, bob_id) = register_user(&base_url, "bob@example.com", "Bob").await;

    let room_id = create_room(&base_url, &alice_token, bob_id).await;

    let (mut alice_write, mut alice_read) = connect_ws(addr, &alice_token).await;
    wait_for_event(&mut alice_read, "online_users").await;
    let (mut bob_write, mut bob_read) = connect_ws(addr, &bob_token).await;
    wait_for_event(&mut bob_read, "online_users").await;

    join_room(&mut alice_write, room_id).await;
    // Joining twice must not double the subscription
    join_room(&mut bob_write, room_id).await;
    join_room(&mut bob_write, room_id).await;
    wait_for_event(&mut alice_read, "user_joined").await;

    send_message(&base_url, &alice_token, room_id, "once only").await;

    let event = wait_for_event(&mut bob_read, "new_message").await;
    assert_eq!(event["data"]["content"], "once only");
    assert_no_event(&mut bob_read, "new_message").await;
}

#[tokio::test]
async fn test_typing_lifecycle_excludes_sender() {
    let (base_url, addr) = start_test_server().await;
    let (alice_token, alice_id) = register_user(&base_url, "alice@example.com", "Alice").await;
    let (bob_token, bob_id) = register_user(&base_url, "bob@example.com", "Bob").await;

    let room_id = create_room(&base_url, &alice_token, bob_id).await;

    let (mut alice_write, mut alice_read) = connect_ws(addr, &alice_token).await;
    wait_for_event(&mut alice_read, "online_users").await;
    let (mut bob_write, mut bob_read) = connect_ws(addr, &bob_token).await;
    wait_for_event(&mut bob_read, "online_users").await;

    join_room(&mut alice_write, room_id).await;
    join_room(&mut bob_write, room_id).await;
    wait_for_event(&mut alice_read, "user_joined").await;

    let frame = json!({
        "event": "typing_start",
        "data": { "chatRoomId": room_id, "nickname": "Alice" }
    });
    alice_write
        .send(Message::Text(frame.to_string().into()))
        .await
        .unwrap();

    let event = wait_for_event(&mut bob_read, "user_typing").await;
    assert_eq!(event["data"]["userId"], alice_id);
    assert_eq!(event["data"]["nickname"], "Alice");
    assert_eq!(event["data"]["chatRoomId"], room_id);
    // The typist never hears their own typing notice
    assert_no_event(&mut alice_read, "user_typing").await;

    let frame = json!({ "event": "typing_stop", "data": { "chatRoomId": room_id } });
    alice_write
        .send(Message::Text(frame.to_string().into()))
        .await
        .unwrap();

    let event = wait_for_event(&mut bob_read, "user_stop_typing").await;
    assert_eq!(event["data"]["userId"], alice_id);
}

#[tokio::test]
async fn test_message_deleted_and_read_receipts() {
    let (base_url, addr) = start_test_server().await;
    let (alice_token, _alice_id) = register_user(&base_url, "alice@example.com", "Alice").await;
    let (bob_token, bob_id) = register_user(&base_url, "bob@example.com", "Bob").await;

    let room_id = create_room(&base_url, &alice_token, bob_id).await;

    let (mut alice_write, mut alice_read) = connect_ws(addr, &alice_token).await;
    wait_for_event(&mut alice_read, "online_users").await;
    let (mut bob_write, mut bob_read) = connect_ws(addr, &bob_token).await;
    wait_for_event(&mut bob_read, "online_users").await;

    join_room(&mut alice_write, room_id).await;
    join_room(&mut bob_write, room_id).await;
    wait_for_event(&mut alice_read, "user_joined").await;

    let message = send_message(&base_url, &alice_token, room_id, "read me").await;
    let message_id = message["id"].as_i64().unwrap();
    wait_for_event(&mut bob_read, "new_message").await;
    wait_for_event(&mut alice_read, "new_message").await;

    // Bob marks the message read: the room hears about it
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/messages/{}/read", base_url, message_id))
        .bearer_auth(&bob_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let event = wait_for_event(&mut alice_read, "message_read").await;
    assert_eq!(event["data"]["messageId"], message_id);
    assert_eq!(event["data"]["userId"], bob_id);
    assert!(event["data"]["readAt"].is_string());

    // Alice deletes her message: the room hears about that too
    let resp = client
        .delete(format!("{}/api/messages/{}", base_url, message_id))
        .bearer_auth(&alice_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let event = wait_for_event(&mut bob_read, "message_deleted").await;
    assert_eq!(event["data"]["messageId"], message_id);
    assert_eq!(event["data"]["chatRoomId"], room_id);
}

#[tokio::test]
async fn test_message_notification_reaches_friend_outside_room() {
    let (base_url, addr) = start_test_server().await;
    let (alice_token, alice_id) = register_user(&base_url, "alice@example.com", "Alice").await;
    let (bob_token, bob_id) = register_user(&base_url, "bob@example.com", "Bob").await;
    let (dave_token, dave_id) = register_user(&base_url, "dave@example.com", "Dave").await;

    // Alice and Dave become friends; Dave is not in the room
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/friends/requests", base_url))
        .bearer_auth(&alice_token)
        .json(&json!({ "friendId": dave_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let resp = client
        .post(format!("{}/api/friends/requests/accept", base_url))
        .bearer_auth(&dave_token)
        .json(&json!({ "friendId": alice_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let room_id = create_room(&base_url, &alice_token, bob_id).await;

    // Dave connects but joins nothing — the personal channel is automatic
    let (_dave_write, mut dave_read) = connect_ws(addr, &dave_token).await;
    wait_for_event(&mut dave_read, "online_users").await;

    send_message(&base_url, &alice_token, room_id, "psst").await;

    let event = wait_for_event(&mut dave_read, "message_notification").await;
    assert_eq!(event["data"]["chatRoomId"], room_id);
    assert_eq!(event["data"]["content"], "psst");
    assert_eq!(event["data"]["senderId"], alice_id);
}
