use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::chat::events::DomainEvent;
use crate::state::AppState;
use crate::ws::protocol::{self, ServerEvent};
use crate::ws::rooms::personal_channel;
use crate::ws::ConnectionId;

/// Ping interval: server sends WebSocket ping every 30 seconds.
/// Prevents connection leaks from abrupt disconnects.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Pong timeout: if pong not received within 10 seconds after ping, close.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Reader task: processes incoming frames, dispatches to protocol handlers
///
/// The mpsc channel allows any part of the system to send messages to this
/// client by cloning the sender.
///
/// Lifecycle on entry (Authenticated state): register with the connection
/// registry, join the personal channel, record fleet-wide presence, send
/// the caller the current online-users snapshot. Lifecycle on exit
/// (Closed state): drop every channel membership, unregister, record the
/// disconnect. Each physical reconnect is a brand-new connection — room
/// channels are not rejoined automatically.
pub async fn run_connection(socket: WebSocket, state: AppState, user_id: i64) {
    let conn_id = ConnectionId::next();
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    // Register and auto-join the personal notification channel
    state.registry.register(conn_id, user_id, tx.clone());
    state.rooms.join(conn_id, &personal_channel(user_id));

    // Record presence; broadcast the transition if this is the user's
    // first connection anywhere in the fleet. Broker failures leave
    // presence stale until the record TTL — never fatal here.
    match state.presence.mark_connected(user_id, conn_id).await {
        Ok(true) => {
            state
                .fanout
                .publish(
                    DomainEvent::PresenceChanged {
                        user_id,
                        online: true,
                    },
                    None,
                )
                .await;
        }
        Ok(false) => {}
        Err(e) => {
            tracing::warn!(user_id, error = %e, "Presence mark_connected failed");
        }
    }

    // Seed the new client with the current online-users snapshot
    match state.presence.snapshot_online_users().await {
        Ok(ids) => {
            if let Some(msg) = ServerEvent::OnlineUsers(ids).to_message() {
                let _ = tx.send(msg);
            }
        }
        Err(e) => {
            tracing::warn!(user_id, error = %e, "Failed to snapshot online users");
        }
    }

    tracing::info!(user_id, connection_id = %conn_id, "WebSocket actor started");

    // Spawn writer task: forwards mpsc messages to WebSocket sink
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Track pong reception
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

    // Spawn ping task: sends periodic pings and monitors pong responses
    let ping_tx = tx.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(PING_INTERVAL);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // Writer task has died — connection is gone
                break;
            }

            match timeout(PONG_TIMEOUT, pong_rx.recv()).await {
                Ok(Some(())) => {
                    // Pong received, continue
                }
                _ => {
                    tracing::warn!("Pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    // Reader loop: process incoming WebSocket frames
    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    protocol::handle_text_frame(&text, &state, conn_id, user_id).await;
                }
                Message::Binary(_) => {
                    // Protocol is JSON text frames
                    tracing::debug!(user_id, "Ignoring unexpected binary frame");
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(user_id, reason = ?frame, "Client initiated close");
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(user_id, error = %e, "WebSocket receive error");
                break;
            }
            None => {
                tracing::info!(user_id, "WebSocket stream ended");
                break;
            }
        }
    }

    // Closed state: abort helper tasks, reverse all registrations
    writer_handle.abort();
    ping_handle.abort();

    state.rooms.drop_connection(conn_id);
    state.registry.unregister(conn_id);

    match state.presence.mark_disconnected(user_id, conn_id).await {
        Ok(true) => {
            state
                .fanout
                .publish(
                    DomainEvent::PresenceChanged {
                        user_id,
                        online: false,
                    },
                    None,
                )
                .await;
        }
        Ok(false) => {}
        Err(e) => {
            tracing::warn!(user_id, error = %e, "Presence mark_disconnected failed");
        }
    }

    tracing::info!(user_id, connection_id = %conn_id, "WebSocket actor stopped");
}

/// Writer task: receives messages from mpsc channel and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed — connection is broken
            break;
        }
    }
}
