//! REST endpoints for chat room CRUD (1:1 and group rooms).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatRoomRequest {
    pub friend_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupChatRoomRequest {
    pub name: Option<String>,
    pub friend_ids: Vec<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoomResponse {
    pub success: bool,
    pub message: String,
    pub chat_room_id: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMemberSummary {
    pub id: i64,
    pub nickname: String,
    pub profile_image_url: Option<String>,
    pub status_message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoomSummary {
    pub id: i64,
    pub name: Option<String>,
    pub is_group: bool,
    pub image_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub users: Vec<RoomMemberSummary>,
    pub last_message: Option<String>,
    pub last_message_at: Option<String>,
    pub unread_count: i64,
}

/// POST /api/chatrooms — create a 1:1 room, reusing an existing non-group
/// room for the same pair. JWT auth required.
pub async fn create_chat_room(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<CreateChatRoomRequest>,
) -> Result<(StatusCode, Json<ChatRoomResponse>), StatusCode> {
    let db = state.db.clone();
    let my_id = claims.sub;
    let friend_id = body.friend_id;

    let response = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        // Reuse an existing 1:1 room holding exactly this pair
        let existing: Option<i64> = conn
            .query_row(
                "SELECT cr.id FROM chat_rooms cr
                 WHERE cr.is_group = 0
                   AND (SELECT COUNT(*) FROM chat_room_users cu
                        WHERE cu.chat_room_id = cr.id AND cu.user_id IN (?1, ?2)) = 2
                   AND (SELECT COUNT(*) FROM chat_room_users cu
                        WHERE cu.chat_room_id = cr.id) = 2",
                rusqlite::params![my_id, friend_id],
                |row| row.get(0),
            )
            .ok();

        if let Some(chat_room_id) = existing {
            return Ok::<_, StatusCode>(ChatRoomResponse {
                success: true,
                message: "Existing chat room found".to_string(),
                chat_room_id,
            });
        }

        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO chat_rooms (is_group, created_at, updated_at) VALUES (0, ?1, ?1)",
            rusqlite::params![now],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let chat_room_id = conn.last_insert_rowid();

        for user_id in [my_id, friend_id] {
            conn.execute(
                "INSERT INTO chat_room_users (chat_room_id, user_id, joined_at)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![chat_room_id, user_id, now],
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        }

        Ok(ChatRoomResponse {
            success: true,
            message: "New chat room created".to_string(),
            chat_room_id,
        })
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /api/chatrooms/group — create a group room with the caller and
/// their chosen friends. JWT auth required.
pub async fn create_group_chat_room(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<CreateGroupChatRoomRequest>,
) -> Result<(StatusCode, Json<ChatRoomResponse>), StatusCode> {
    if body.friend_ids.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let my_id = claims.sub;
    let friend_ids = body.friend_ids.clone();
    let name = body
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| format!("Group Chat {}", Utc::now().timestamp_millis() % 10_000_000));

    let response = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO chat_rooms (name, is_group, created_at, updated_at)
             VALUES (?1, 1, ?2, ?2)",
            rusqlite::params![name, now],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let chat_room_id = conn.last_insert_rowid();

        for user_id in friend_ids.iter().chain(std::iter::once(&my_id)) {
            conn.execute(
                "INSERT OR IGNORE INTO chat_room_users (chat_room_id, user_id, joined_at)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![chat_room_id, user_id, now],
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        }

        Ok::<_, StatusCode>(ChatRoomResponse {
            success: true,
            message: "New group chat room created".to_string(),
            chat_room_id,
        })
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /api/chatrooms — the caller's rooms with member summaries, last
/// message, and unread count, most recently active first. JWT auth required.
pub async fn list_my_chat_rooms(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<ChatRoomSummary>>, StatusCode> {
    let db = state.db.clone();
    let my_id = claims.sub;

    let rooms = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let mut stmt = conn
            .prepare(
                "SELECT cr.id, cr.name, cr.is_group, cr.image_url, cr.created_at, cr.updated_at
                 FROM chat_rooms cr
                 JOIN chat_room_users cu ON cu.chat_room_id = cr.id
                 WHERE cu.user_id = ?1 AND cu.left_at IS NULL
                 ORDER BY cr.updated_at DESC",
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let mut rooms: Vec<ChatRoomSummary> = stmt
            .query_map([my_id], |row| {
                Ok(ChatRoomSummary {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    is_group: row.get(2)?,
                    image_url: row.get(3)?,
                    created_at: row.get(4)?,
                    updated_at: row.get(5)?,
                    users: Vec::new(),
                    last_message: None,
                    last_message_at: None,
                    unread_count: 0,
                })
            })
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .filter_map(|r| r.ok())
            .collect();

        let mut member_stmt = conn
            .prepare(
                "SELECT u.id, u.nickname, u.profile_image_url, u.status_message
                 FROM chat_room_users cu
                 JOIN users u ON u.id = cu.user_id
                 WHERE cu.chat_room_id = ?1 AND cu.left_at IS NULL",
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let mut last_msg_stmt = conn
            .prepare(
                "SELECT content, is_deleted, created_at FROM messages
                 WHERE chat_room_id = ?1
                 ORDER BY created_at DESC, id DESC LIMIT 1",
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let mut unread_stmt = conn
            .prepare(
                "SELECT COUNT(*) FROM messages m
                 WHERE m.chat_room_id = ?1 AND m.sender_id != ?2
                   AND NOT EXISTS (SELECT 1 FROM read_receipts r
                                   WHERE r.message_id = m.id AND r.user_id = ?2)",
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        for room in &mut rooms {
            room.users = member_stmt
                .query_map([room.id], |row| {
                    Ok(RoomMemberSummary {
                        id: row.get(0)?,
                        nickname: row.get(1)?,
                        profile_image_url: row.get(2)?,
                        status_message: row.get(3)?,
                    })
                })
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
                .filter_map(|r| r.ok())
                .collect();

            if let Ok((content, is_deleted, created_at)) =
                last_msg_stmt.query_row([room.id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, bool>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })
            {
                room.last_message = Some(if is_deleted {
                    "Deleted message".to_string()
                } else {
                    content
                });
                room.last_message_at = Some(created_at);
            }

            room.unread_count = unread_stmt
                .query_row(rusqlite::params![room.id, my_id], |row| row.get(0))
                .unwrap_or(0);
        }

        Ok::<_, StatusCode>(rooms)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(rooms))
}

/// DELETE /api/chatrooms/{id} — delete a room the caller participates in.
/// 404 both for a missing room and a room the caller is not in.
pub async fn delete_chat_room(
    State(state): State<AppState>,
    claims: Claims,
    Path(chat_room_id): Path<i64>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let db = state.db.clone();
    let my_id = claims.sub;

    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let is_participant: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM chat_room_users
                 WHERE chat_room_id = ?1 AND user_id = ?2 AND left_at IS NULL",
                rusqlite::params![chat_room_id, my_id],
                |row| row.get::<_, i64>(0).map(|c| c > 0),
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        if !is_participant {
            return Err(StatusCode::NOT_FOUND);
        }

        conn.execute(
            "DELETE FROM chat_rooms WHERE id = ?1",
            rusqlite::params![chat_room_id],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        Ok(())
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Chat room deleted"
    })))
}
