//! REST endpoints for messages and read receipts.
//!
//! Persistence happens here; the fan-out engine only announces the result.
//! A client that misses an announcement recovers by refetching history.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::chat::events::DomainEvent;
use crate::state::AppState;
use crate::ws::protocol::{MessagePayload, MessageSender, ReadReceipt};

/// Maximum message content length (chars).
const MAX_CONTENT_LENGTH: usize = 4000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageRequest {
    pub chat_room_id: i64,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteMessageResponse {
    pub success: bool,
    pub message: String,
}

/// POST /api/messages — persist a message and fan it out. JWT auth required.
/// 403 if the sender does not currently belong to the room.
pub async fn create_message(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<CreateMessageRequest>,
) -> Result<(StatusCode, Json<MessagePayload>), StatusCode> {
    let content = body.content.trim().to_string();
    if content.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    if content.len() > MAX_CONTENT_LENGTH {
        return Err(StatusCode::PAYLOAD_TOO_LARGE);
    }

    let db = state.db.clone();
    let user_id = claims.sub;
    let chat_room_id = body.chat_room_id;

    let (message, friend_ids) = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        // Sender must currently belong to the room
        let is_member: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM chat_room_users
                 WHERE chat_room_id = ?1 AND user_id = ?2 AND left_at IS NULL",
                rusqlite::params![chat_room_id, user_id],
                |row| row.get::<_, i64>(0).map(|c| c > 0),
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        if !is_member {
            return Err(StatusCode::FORBIDDEN);
        }

        let (nickname, profile_image_url): (String, Option<String>) = conn
            .query_row(
                "SELECT nickname, profile_image_url FROM users WHERE id = ?1",
                rusqlite::params![user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO messages (chat_room_id, sender_id, content, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            rusqlite::params![chat_room_id, user_id, content, now],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let message_id = conn.last_insert_rowid();

        // New activity bumps the room in everyone's room list
        conn.execute(
            "UPDATE chat_rooms SET updated_at = ?1 WHERE id = ?2",
            rusqlite::params![now, chat_room_id],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        // Friends of the sender get a personal-channel notification
        let mut stmt = conn
            .prepare("SELECT friend_id FROM friends WHERE user_id = ?1")
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let friend_ids: Vec<i64> = stmt
            .query_map([user_id], |row| row.get(0))
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .filter_map(|r| r.ok())
            .collect();

        let message = MessagePayload {
            id: message_id,
            chat_room_id,
            sender_id: user_id,
            content,
            is_deleted: false,
            created_at: now.clone(),
            updated_at: now,
            sender: MessageSender {
                id: user_id,
                nickname,
                profile_image_url,
            },
            read_receipts: Vec::new(),
        };
        Ok((message, friend_ids))
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    state
        .fanout
        .publish(
            DomainEvent::MessageCreated {
                message: message.clone(),
                friend_ids,
            },
            None,
        )
        .await;

    Ok((StatusCode::CREATED, Json(message)))
}

/// GET /api/chatrooms/{id}/messages — full history, oldest first.
/// JWT auth required; 403 for non-members.
pub async fn list_messages(
    State(state): State<AppState>,
    claims: Claims,
    Path(chat_room_id): Path<i64>,
) -> Result<Json<Vec<MessagePayload>>, StatusCode> {
    let db = state.db.clone();
    let user_id = claims.sub;

    let messages = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let is_member: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM chat_room_users
                 WHERE chat_room_id = ?1 AND user_id = ?2",
                rusqlite::params![chat_room_id, user_id],
                |row| row.get::<_, i64>(0).map(|c| c > 0),
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        if !is_member {
            return Err(StatusCode::FORBIDDEN);
        }

        let mut stmt = conn
            .prepare(
                "SELECT m.id, m.chat_room_id, m.sender_id, m.content, m.is_deleted,
                        m.created_at, m.updated_at, u.nickname, u.profile_image_url
                 FROM messages m
                 JOIN users u ON u.id = m.sender_id
                 WHERE m.chat_room_id = ?1
                 ORDER BY m.created_at ASC, m.id ASC",
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let mut messages: Vec<MessagePayload> = stmt
            .query_map([chat_room_id], |row| {
                Ok(MessagePayload {
                    id: row.get(0)?,
                    chat_room_id: row.get(1)?,
                    sender_id: row.get(2)?,
                    content: row.get(3)?,
                    is_deleted: row.get(4)?,
                    created_at: row.get(5)?,
                    updated_at: row.get(6)?,
                    sender: MessageSender {
                        id: row.get(2)?,
                        nickname: row.get(7)?,
                        profile_image_url: row.get(8)?,
                    },
                    read_receipts: Vec::new(),
                })
            })
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .filter_map(|r| r.ok())
            .collect();

        let mut receipt_stmt = conn
            .prepare(
                "SELECT user_id, read_at FROM read_receipts WHERE message_id = ?1",
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        for message in &mut messages {
            message.read_receipts = receipt_stmt
                .query_map([message.id], |row| {
                    Ok(ReadReceipt {
                        user_id: row.get(0)?,
                        read_at: row.get(1)?,
                    })
                })
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
                .filter_map(|r| r.ok())
                .collect();
        }

        Ok(messages)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(messages))
}

/// DELETE /api/messages/{id} — soft delete own message. JWT auth required.
/// 404 if missing, 403 if not the sender.
pub async fn delete_message(
    State(state): State<AppState>,
    claims: Claims,
    Path(message_id): Path<i64>,
) -> Result<Json<DeleteMessageResponse>, StatusCode> {
    let db = state.db.clone();
    let user_id = claims.sub;

    let chat_room_id = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let (sender_id, chat_room_id): (i64, i64) = conn
            .query_row(
                "SELECT sender_id, chat_room_id FROM messages WHERE id = ?1",
                rusqlite::params![message_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|_| StatusCode::NOT_FOUND)?;

        if sender_id != user_id {
            return Err(StatusCode::FORBIDDEN);
        }

        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE messages SET is_deleted = 1, updated_at = ?1 WHERE id = ?2",
            rusqlite::params![now, message_id],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        Ok(chat_room_id)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    state
        .fanout
        .publish(
            DomainEvent::MessageDeleted {
                message_id,
                chat_room_id,
            },
            None,
        )
        .await;

    Ok(Json(DeleteMessageResponse {
        success: true,
        message: "Message deleted".to_string(),
    }))
}

/// POST /api/messages/{id}/read — record a read receipt. JWT auth required.
/// Reading your own message is a silent no-op; re-reading keeps the
/// original receipt timestamp (idempotent upsert).
pub async fn mark_read(
    State(state): State<AppState>,
    claims: Claims,
    Path(message_id): Path<i64>,
) -> Result<Json<Option<ReadReceipt>>, StatusCode> {
    let db = state.db.clone();
    let user_id = claims.sub;

    let outcome = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let (sender_id, chat_room_id): (i64, i64) = conn
            .query_row(
                "SELECT sender_id, chat_room_id FROM messages WHERE id = ?1",
                rusqlite::params![message_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|_| StatusCode::NOT_FOUND)?;

        // Own messages are never marked read
        if sender_id == user_id {
            return Ok::<_, StatusCode>(None);
        }

        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT OR IGNORE INTO read_receipts (message_id, user_id, read_at)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![message_id, user_id, now],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        // Report the stored timestamp — unchanged if the receipt existed
        let read_at: String = conn
            .query_row(
                "SELECT read_at FROM read_receipts WHERE message_id = ?1 AND user_id = ?2",
                rusqlite::params![message_id, user_id],
                |row| row.get(0),
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        Ok(Some((chat_room_id, ReadReceipt { user_id, read_at })))
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    let Some((chat_room_id, receipt)) = outcome else {
        return Ok(Json(None));
    };

    state
        .fanout
        .publish(
            DomainEvent::MessageRead {
                message_id,
                user_id: receipt.user_id,
                chat_room_id,
                read_at: receipt.read_at.clone(),
            },
            None,
        )
        .await;

    Ok(Json(Some(receipt)))
}
