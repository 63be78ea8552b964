//! Wire protocol: JSON text frames shaped `{"event": <name>, "data": <payload>}`.
//!
//! Event names and payload field casing match what the web client already
//! speaks (snake_case events, camelCase fields). Client-to-server and
//! server-to-client events are closed enums, so dispatch is an exhaustive
//! match rather than a string-keyed handler table.

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};

use crate::chat::events::DomainEvent;
use crate::state::AppState;
use crate::ws::{rooms, ConnectionId};

/// Message payload embedded in `new_message` / `message_notification`.
/// Mirrors the persisted message row plus its sender summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub id: i64,
    pub chat_room_id: i64,
    pub sender_id: i64,
    pub content: String,
    pub is_deleted: bool,
    pub created_at: String,
    pub updated_at: String,
    pub sender: MessageSender,
    pub read_receipts: Vec<ReadReceipt>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSender {
    pub id: i64,
    pub nickname: String,
    pub profile_image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub user_id: i64,
    pub read_at: String,
}

/// Server-to-client events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Sent once, right after authentication: ids of all online users.
    OnlineUsers(Vec<i64>),
    #[serde(rename_all = "camelCase")]
    UserOnline { user_id: i64 },
    #[serde(rename_all = "camelCase")]
    UserOffline { user_id: i64 },
    NewMessage(MessagePayload),
    MessageNotification(MessagePayload),
    #[serde(rename_all = "camelCase")]
    MessageDeleted { message_id: i64, chat_room_id: i64 },
    #[serde(rename_all = "camelCase")]
    MessageRead {
        message_id: i64,
        user_id: i64,
        read_at: String,
    },
    #[serde(rename_all = "camelCase")]
    UserJoined { user_id: i64, chat_room_id: i64 },
    #[serde(rename_all = "camelCase")]
    UserLeft { user_id: i64, chat_room_id: i64 },
    #[serde(rename_all = "camelCase")]
    UserTyping {
        user_id: i64,
        nickname: String,
        chat_room_id: i64,
    },
    #[serde(rename_all = "camelCase")]
    UserStopTyping { user_id: i64, chat_room_id: i64 },
}

impl ServerEvent {
    /// Encode as a WebSocket text frame.
    pub fn to_message(&self) -> Option<Message> {
        match serde_json::to_string(self) {
            Ok(json) => Some(Message::Text(json.into())),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize server event");
                None
            }
        }
    }
}

/// Client-to-server requests, accepted only in the authenticated state.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    JoinRoom { chat_room_id: i64 },
    #[serde(rename_all = "camelCase")]
    LeaveRoom { chat_room_id: i64 },
    #[serde(rename_all = "camelCase")]
    TypingStart {
        chat_room_id: i64,
        nickname: String,
    },
    #[serde(rename_all = "camelCase")]
    TypingStop { chat_room_id: i64 },
}

/// Handle an incoming text frame from an authenticated connection.
/// Malformed frames are logged and dropped — they never take down the
/// connection or the dispatch loop.
pub async fn handle_text_frame(
    text: &str,
    state: &AppState,
    conn_id: ConnectionId,
    user_id: i64,
) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(
                user_id,
                connection_id = %conn_id,
                error = %e,
                "Dropping malformed client event"
            );
            return;
        }
    };

    match event {
        ClientEvent::JoinRoom { chat_room_id } => {
            handle_join_room(state, conn_id, user_id, chat_room_id).await;
        }
        ClientEvent::LeaveRoom { chat_room_id } => {
            state
                .rooms
                .leave(conn_id, &rooms::room_channel(chat_room_id));
            tracing::debug!(user_id, chat_room_id, "Left room channel");
            state
                .fanout
                .publish(
                    DomainEvent::RoomLeft {
                        user_id,
                        chat_room_id,
                    },
                    Some(conn_id),
                )
                .await;
        }
        ClientEvent::TypingStart {
            chat_room_id,
            nickname,
        } => {
            // Broadcast to the rest of the room, excluding the typist.
            state
                .fanout
                .publish(
                    DomainEvent::TypingStarted {
                        user_id,
                        nickname,
                        chat_room_id,
                    },
                    Some(conn_id),
                )
                .await;
        }
        ClientEvent::TypingStop { chat_room_id } => {
            state
                .fanout
                .publish(
                    DomainEvent::TypingStopped {
                        user_id,
                        chat_room_id,
                    },
                    Some(conn_id),
                )
                .await;
        }
    }
}

/// Join a room channel after checking the user actually belongs to the
/// room. A non-member's join is ignored (the connection stays alive).
async fn handle_join_room(state: &AppState, conn_id: ConnectionId, user_id: i64, chat_room_id: i64) {
    let db = state.db.clone();
    let is_member = tokio::task::spawn_blocking(move || {
        let conn = db.lock().ok()?;
        conn.query_row(
            "SELECT COUNT(*) FROM chat_room_users
             WHERE chat_room_id = ?1 AND user_id = ?2 AND left_at IS NULL",
            rusqlite::params![chat_room_id, user_id],
            |row| row.get::<_, i64>(0).map(|c| c > 0),
        )
        .ok()
    })
    .await
    .ok()
    .flatten()
    .unwrap_or(false);

    if !is_member {
        tracing::warn!(user_id, chat_room_id, "Rejected join for non-member");
        return;
    }

    state.rooms.join(conn_id, &rooms::room_channel(chat_room_id));
    tracing::debug!(user_id, chat_room_id, "Joined room channel");

    // Informational notice to the rest of the room.
    state
        .fanout
        .publish(
            DomainEvent::RoomJoined {
                user_id,
                chat_room_id,
            },
            Some(conn_id),
        )
        .await;
}
