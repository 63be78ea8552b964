//! Integration tests for presence transitions: online/offline broadcasts,
//! snapshots, and multi-device connections.

mod common;

use common::*;
use futures_util::SinkExt;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

#[tokio::test]
async fn test_single_device_online_offline() {
    let (base_url, addr) = start_test_server().await;
    let (alice_token, alice_id) = register_user(&base_url, "alice@example.com", "Alice").await;
    let (bob_token, bob_id) = register_user(&base_url, "bob@example.com", "Bob").await;

    let (_alice_write, mut alice_read) = connect_ws(addr, &alice_token).await;
    let snapshot = wait_for_event(&mut alice_read, "online_users").await;
    let ids: Vec<i64> = serde_json::from_value(snapshot["data"].clone()).unwrap();
    assert_eq!(ids, vec![alice_id]);

    // Bob connects: Alice sees the online transition, Bob's snapshot has both
    let (mut bob_write, mut bob_read) = connect_ws(addr, &bob_token).await;
    let snapshot = wait_for_event(&mut bob_read, "online_users").await;
    let ids: Vec<i64> = serde_json::from_value(snapshot["data"].clone()).unwrap();
    assert_eq!(ids, vec![alice_id, bob_id], "Snapshot is sorted and complete");

    let event = wait_for_event(&mut alice_read, "user_online").await;
    assert_eq!(event["data"]["userId"], bob_id);

    // Bob disconnects: Alice sees the offline transition
    bob_write
        .send(Message::Close(None))
        .await
        .expect("Failed to close");
    let event = wait_for_event(&mut alice_read, "user_offline").await;
    assert_eq!(event["data"]["userId"], bob_id);
}

#[tokio::test]
async fn test_multi_device_single_transition_each_way() {
    let (base_url, addr) = start_test_server().await;
    let (alice_token, _alice_id) = register_user(&base_url, "alice@example.com", "Alice").await;
    let (bob_token, bob_id) = register_user(&base_url, "bob@example.com", "Bob").await;

    let (_alice_write, mut alice_read) = connect_ws(addr, &alice_token).await;
    wait_for_event(&mut alice_read, "online_users").await;

    // First device: one online transition
    let (mut bob_write1, mut bob_read1) = connect_ws(addr, &bob_token).await;
    wait_for_event(&mut bob_read1, "online_users").await;
    let event = wait_for_event(&mut alice_read, "user_online").await;
    assert_eq!(event["data"]["userId"], bob_id);

    // Second device: no duplicate transition
    let (mut bob_write2, mut bob_read2) = connect_ws(addr, &bob_token).await;
    wait_for_event(&mut bob_read2, "online_users").await;
    assert_no_event(&mut alice_read, "user_online").await;

    // First device leaves: still online via the second
    bob_write1
        .send(Message::Close(None))
        .await
        .expect("Failed to close device 1");
    assert_no_event(&mut alice_read, "user_offline").await;

    // Last device leaves: exactly one offline transition
    bob_write2
        .send(Message::Close(None))
        .await
        .expect("Failed to close device 2");
    let event = wait_for_event(&mut alice_read, "user_offline").await;
    assert_eq!(event["data"]["userId"], bob_id);
}

#[tokio::test]
async fn test_reconnect_emits_fresh_transition() {
    let (base_url, addr) = start_test_server().await;
    let (alice_token, _alice_id) = register_user(&base_url, "alice@example.com", "Alice").await;
    let (bob_token, bob_id) = register_user(&base_url, "bob@example.com", "Bob").await;

    let (_alice_write, mut alice_read) = connect_ws(addr, &alice_token).await;
    wait_for_event(&mut alice_read, "online_users").await;

    let (mut bob_write, _bob_read) = connect_ws(addr, &bob_token).await;
    wait_for_event(&mut alice_read, "user_online").await;

    bob_write
        .send(Message::Close(None))
        .await
        .expect("Failed to close");
    wait_for_event(&mut alice_read, "user_offline").await;

    // Give the server a moment to finish cleanup
    tokio::time::sleep(Duration::from_millis(100)).await;

    // A fresh connection is a fresh offline→online transition
    let (_bob_write2, _bob_read2) = connect_ws(addr, &bob_token).await;
    let event = wait_for_event(&mut alice_read, "user_online").await;
    assert_eq!(event["data"]["userId"], bob_id);
}
